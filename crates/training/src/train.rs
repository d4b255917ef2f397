//! Supervised classifier training with periodic validation and best-checkpoint saving.

use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use clap::Parser;
use cli_support::{init_workers, validate_backend_choice, BackendKind, RootArgs, RunConfig};
use image_dataset::{get_dataset, BatchIter, ClassificationDataset, DatasetKind, ImageLoader};
use models::{network_config, NormMode, ResNet, ResNetConfig};

use crate::checkpoint::{self, CheckpointState};
use crate::eval::test_accuracy;
use crate::losses::{accuracy, scalar};
use crate::metrics::{linspace, MetricLog};
use crate::plot::pretty_plot;
use crate::runlog::RunLog;
use crate::{ADBackend, TrainBackend};

const PLOT_SMOOTHING: usize = 500;

#[derive(Parser, Debug, Clone)]
#[command(name = "train", about = "Train an image classifier and keep its checkpoint up to date")]
pub struct TrainArgs {
    /// Dataset to train on (CIFAR10, CIFAR10Distorted, MNIST, PBCBarcelona, Shapes).
    #[arg(long, default_value = "CIFAR10")]
    pub dataset: DatasetKind,
    /// Classifier architecture (resnet18, resnet34, resnet8, simplecnn).
    #[arg(long, default_value = "resnet18")]
    pub network: String,
    /// Checkpoint directory; `auto` derives it from dataset and network.
    #[arg(long, default_value = "auto")]
    pub ckpt: String,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Number of training epochs (absolute, counting resumed ones).
    #[arg(long, default_value_t = 5)]
    pub num_epochs: usize,
    /// Learning rate.
    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,
    /// Batch size.
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
    /// Ignore an existing checkpoint and start over.
    #[arg(long)]
    pub reset: bool,
    /// Save only when validation accuracy improves.
    #[arg(long)]
    pub save_best: bool,
    /// Seed for weight init and shuffling.
    #[arg(long, default_value_t = 4)]
    pub seed: u64,
    /// Log progress every N steps within an epoch.
    #[arg(long, default_value_t = 50)]
    pub log_every: usize,
    #[command(flatten)]
    pub roots: RootArgs,
}

impl TrainArgs {
    fn summary(&self) -> String {
        let lines = [
            format!("dataset={}", self.dataset),
            format!("network={}", self.network),
            format!("ckpt={}", self.ckpt),
            format!("backend={}", self.backend),
            format!("num_epochs={}", self.num_epochs),
            format!("lr={}", self.lr),
            format!("batch_size={}", self.batch_size),
            format!("reset={}", self.reset),
            format!("save_best={}", self.save_best),
            format!("seed={}", self.seed),
        ];
        format!("\n{}\n", lines.join("\n"))
    }

    /// Resolve `auto` to `<models_root>/<dataset>_<network>.ckpt`.
    pub fn checkpoint_path(&self, cfg: &RunConfig) -> PathBuf {
        if self.ckpt == "auto" {
            cfg.models_root
                .join(format!("{}_{}.ckpt", self.dataset, self.network))
        } else {
            PathBuf::from(&self.ckpt)
        }
    }
}

/// What a finished training run left behind.
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub ckpt: PathBuf,
    pub epochs: usize,
    pub best_acc: f64,
    pub valid_acc: f64,
    /// Validation accuracy after each epoch of this run.
    pub valid_history: Vec<f64>,
    /// Epochs (1-based, absolute) whose checkpoint was written.
    pub saved_epochs: Vec<usize>,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainSummary> {
    validate_backend_choice(args.backend)?;
    let cfg = RunConfig::load().with_overrides(&args.roots);
    init_workers(cfg.workers);

    let ckpt = args.checkpoint_path(&cfg);
    let plot_path = ckpt.with_extension("png");
    let runlog = RunLog::new(ckpt.with_extension("txt"));
    let batch_size = args.batch_size.max(1);

    <ADBackend as Backend>::seed(args.seed);
    let device = <ADBackend as Backend>::Device::default();

    let dataset = get_dataset(args.dataset, &cfg.data_root, true, args.seed)
        .with_context(|| format!("loading dataset {}", args.dataset))?;
    let mut train_loader = ImageLoader::new(dataset.train_set.clone(), batch_size, Some(args.seed));
    let steps_per_epoch = train_loader.len();

    let (mut model, mut optim, init_epoch, mut logs, mut best_acc, config) =
        if checkpoint::exists(&ckpt) && !args.reset {
            let state: CheckpointState<ResNetConfig> = checkpoint::load_state(&ckpt)?;
            let model = checkpoint::load_model::<ADBackend, _>(
                &ckpt,
                state.config.init::<ADBackend>(&device),
                &device,
            )?;
            let optim = checkpoint::load_optimizer::<ADBackend, ResNet<ADBackend>, _>(
                &ckpt,
                AdamConfig::new().init::<ADBackend, ResNet<ADBackend>>(),
                &device,
            )?;
            if state.input_shape.is_some_and(|shape| shape != dataset.input_shape) {
                tracing::warn!(
                    "checkpoint input shape {:?} differs from {} {:?}",
                    state.input_shape,
                    dataset.kind,
                    dataset.input_shape
                );
            }
            runlog.line(format!(
                "Loading model {} ({} epochs), valid acc {:.3}",
                ckpt.display(),
                state.epoch,
                state.acc
            ));
            (model, optim, state.epoch, state.logs, state.acc, state.config)
        } else {
            let config = network_config(&args.network, dataset.in_channels, dataset.num_classes)?;
            let model = config.init::<ADBackend>(&device);
            let optim = AdamConfig::new().init::<ADBackend, ResNet<ADBackend>>();
            runlog
                .clear()
                .with_context(|| format!("removing stale log {}", runlog.path().display()))?;
            (model, optim, 0, MetricLog::new(), 0.0, config)
        };

    let mut valid_acc = valid_accuracy(&model, &dataset, batch_size, &device)?;

    runlog.line(args.summary());
    runlog.line(format!(
        "Training {}, params:\t{:.2} K",
        config.name,
        model.num_params() as f64 / 1000.0
    ));

    let loss_fn = CrossEntropyLossConfig::new().init(&device);
    let log_every = args.log_every.max(1);
    let mut epochs = init_epoch;
    let mut valid_history = Vec::new();
    let mut saved_epochs = Vec::new();

    for epoch in init_epoch..args.num_epochs {
        let mut batches = train_loader.iter();
        let mut step = 0usize;
        while let Some(batch) = batches.next_batch::<ADBackend>(&device)? {
            let out = model.forward_with_stats(batch.images, NormMode::Train);
            let loss = loss_fn.forward(out.logits.clone(), batch.labels.clone());

            let acc = accuracy(out.logits, batch.labels);
            let loss_value = scalar(loss.clone().detach());
            logs.push_all(&[("acc", acc), ("loss", loss_value)]);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(args.lr, model, grads);

            if step % log_every == 0 {
                runlog.line(format!(
                    "[{epoch}/{}:{step:3}] acc {acc:.3}, loss {loss_value:.3}",
                    args.num_epochs
                ));
            }
            step += 1;
        }
        epochs = epoch + 1;

        let previous = valid_acc;
        valid_acc = valid_accuracy(&model, &dataset, batch_size, &device)?;
        logs.extend("val_acc", linspace(previous, valid_acc, steps_per_epoch));

        valid_history.push(valid_acc);
        if !args.save_best || valid_acc > best_acc {
            pretty_plot(&logs, steps_per_epoch, PLOT_SMOOTHING, &plot_path)
                .with_context(|| format!("writing plot {}", plot_path.display()))?;
            best_acc = valid_acc;
            saved_epochs.push(epoch + 1);

            runlog.line(format!("Saving model to {}", ckpt.display()));
            let state = CheckpointState {
                epoch: epoch + 1,
                acc: best_acc,
                logs: logs.clone(),
                input_shape: Some(dataset.input_shape),
                classes: Some(dataset.classes.clone()),
                config: config.clone(),
            };
            save_checkpoint(&ckpt, &model, &optim, &state)?;
        }
    }

    Ok(TrainSummary {
        ckpt,
        epochs,
        best_acc,
        valid_acc,
        valid_history,
        saved_epochs,
    })
}

fn valid_accuracy(
    model: &ResNet<ADBackend>,
    dataset: &ClassificationDataset,
    batch_size: usize,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<f64> {
    let model = model.valid();
    test_accuracy::<TrainBackend, _>(
        |x| model.forward(x),
        BatchIter::sequential(dataset.valid_set.clone(), batch_size),
        None,
        Some("valid"),
        device,
    )
}

fn save_checkpoint<O>(
    ckpt: &Path,
    model: &ResNet<ADBackend>,
    optim: &O,
    state: &CheckpointState<ResNetConfig>,
) -> anyhow::Result<()>
where
    O: Optimizer<ResNet<ADBackend>, ADBackend>,
{
    checkpoint::save::<ADBackend, _, _, _>(ckpt, model, optim, state)
        .with_context(|| format!("saving checkpoint {}", ckpt.display()))
}
