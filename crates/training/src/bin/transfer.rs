use clap::Parser;
use training::transfer::{run_transfer, TransferArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = TransferArgs::parse();
    let summary = run_transfer(args)?;
    tracing::info!(
        "finished at epoch {}, valid acc {:.3}, best {:.3} ({})",
        summary.epochs,
        summary.valid_acc,
        summary.best_acc,
        summary.run_dir.display()
    );
    Ok(())
}
