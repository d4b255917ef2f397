use clap::Parser;
use training::train::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = TrainArgs::parse();
    let summary = run_train(args)?;
    tracing::info!(
        "finished {} epochs, best valid acc {:.3} ({})",
        summary.epochs,
        summary.best_acc,
        summary.ckpt.display()
    );
    Ok(())
}
