//! Train an image-to-image network in front of a frozen classifier so that the
//! classifier's batch-norm statistics match on a new input distribution.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::Parser;
use cli_support::{init_workers, validate_backend_choice, BackendKind, RootArgs, RunConfig};
use image_dataset::{
    adapt_channels, get_dataset, BatchIter, DatasetKind, ImageLoader, ImageSource, Subset,
};
use models::{NormMode, ResNet, ResNetConfig, TransferKind, TransferNet, TransferNetConfig};

use crate::checkpoint::{self, CheckpointState};
use crate::eval::test_accuracy;
use crate::grid::{save_image, tensor_grid};
use crate::losses::{accuracy, bn_matching_loss, moment_penalty, scalar, total_variation};
use crate::metrics::{linspace, MetricLog};
use crate::plot::pretty_plot;
use crate::runlog::RunLog;
use crate::{ADBackend, TrainBackend};

const PLOT_SMOOTHING: usize = 50;
const SAMPLE_COUNT: usize = 32;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "transfer",
    about = "Adapt a new input distribution to a frozen classifier via batch-norm statistic matching"
)]
pub struct TransferArgs {
    /// Target dataset the transfer network sees as input.
    #[arg(long, default_value = "CIFAR10")]
    pub dataset_to: DatasetKind,
    /// Transfer architecture (Unet, UnetPlusPlus, Conv).
    #[arg(long, default_value = "Unet")]
    pub network: TransferKind,
    /// Classifier checkpoint to freeze.
    #[arg(long, default_value = "models/model.ckpt")]
    pub model_from: PathBuf,
    /// Run directory; `auto` derives it from `--model-from` and the hyperparameters.
    #[arg(long, default_value = "auto")]
    pub ckpt: String,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Number of training images used for transfer; `<= 0` uses the whole split.
    #[arg(long, default_value_t = 4096, allow_negative_numbers = true)]
    pub size: i64,
    /// Number of epochs to run in this invocation.
    #[arg(long, default_value_t = 3)]
    pub num_epochs: usize,
    /// Learning rate.
    #[arg(long, default_value_t = 0.1)]
    pub lr: f64,
    /// Batch size.
    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,
    /// Weight of the batch-norm statistic matching loss.
    #[arg(long, default_value_t = 0.01)]
    pub f_stats: f64,
    /// Weight of the moment + total-variation regularizer.
    #[arg(long, default_value_t = 0.0)]
    pub f_reg: f64,
    /// Don't use label information.
    #[arg(long)]
    pub unsupervised: bool,
    /// Keep training an existing transfer checkpoint.
    #[arg(long)]
    pub resume_training: bool,
    /// Delete the run directory and start over.
    #[arg(long)]
    pub reset: bool,
    /// Save only when validation accuracy improves.
    #[arg(long)]
    pub save_best: bool,
    /// Write `sample_<epoch>.png` every N epochs (0 disables).
    #[arg(long, default_value_t = 10)]
    pub sample_every: usize,
    /// Seed for weight init and shuffling.
    #[arg(long, default_value_t = 4)]
    pub seed: u64,
    #[command(flatten)]
    pub roots: RootArgs,
}

impl TransferArgs {
    fn summary(&self) -> String {
        let lines = [
            format!("dataset_to={}", self.dataset_to),
            format!("network={}", self.network),
            format!("model_from={}", self.model_from.display()),
            format!("ckpt={}", self.ckpt),
            format!("backend={}", self.backend),
            format!("size={}", self.size),
            format!("num_epochs={}", self.num_epochs),
            format!("lr={}", self.lr),
            format!("batch_size={}", self.batch_size),
            format!("f_stats={}", self.f_stats),
            format!("f_reg={}", self.f_reg),
            format!("unsupervised={}", self.unsupervised),
            format!("resume_training={}", self.resume_training),
            format!("reset={}", self.reset),
            format!("save_best={}", self.save_best),
            format!("sample_every={}", self.sample_every),
            format!("seed={}", self.seed),
        ];
        format!("\n{}\n", lines.join("\n"))
    }

    /// Run directory for this transfer.
    ///
    /// `auto` turns `models/x.ckpt` into
    /// `transfer/x_to_<dataset>_lr=<lr>_f-st=<f_stats>`; anything else is used as is.
    pub fn run_dir(&self, cfg: &RunConfig) -> PathBuf {
        if self.ckpt != "auto" {
            return PathBuf::from(&self.ckpt);
        }
        let suffix = format!(
            "_to_{}_lr={}_f-st={}",
            self.dataset_to,
            sci_tag(self.lr),
            sci_tag(self.f_stats)
        );
        let from = self.model_from.to_string_lossy();
        let renamed = match from.strip_suffix(".ckpt") {
            Some(stem) => format!("{stem}{suffix}"),
            None => format!("{from}{suffix}"),
        };
        let renamed = PathBuf::from(renamed);
        match renamed.strip_prefix(&cfg.models_root) {
            Ok(rest) => cfg.transfer_root.join(rest),
            Err(_) => match renamed.file_name() {
                Some(name) => cfg.transfer_root.join(name),
                None => cfg.transfer_root.join(renamed),
            },
        }
    }
}

/// One-significant-digit scientific notation with a signed two-digit exponent (`1e-01`).
pub fn sci_tag(value: f64) -> String {
    let raw = format!("{value:.0e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
        }
        None => raw,
    }
}

#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub run_dir: PathBuf,
    pub epochs: usize,
    pub best_acc: f64,
    pub valid_acc: f64,
    /// Validation accuracy after each epoch of this run.
    pub valid_history: Vec<f64>,
    /// Epochs (1-based, absolute) whose checkpoint was written.
    pub saved_epochs: Vec<usize>,
    pub baseline_acc: Option<f64>,
}

pub fn run_transfer(args: TransferArgs) -> anyhow::Result<TransferSummary> {
    validate_backend_choice(args.backend)?;
    if args.unsupervised && args.f_stats == 0.0 && args.f_reg == 0.0 {
        anyhow::bail!("--unsupervised with --f-stats 0 and --f-reg 0 leaves nothing to optimize");
    }
    let cfg = RunConfig::load().with_overrides(&args.roots);
    init_workers(cfg.workers);

    let run_dir = args.run_dir(&cfg);
    if args.reset && run_dir.exists() {
        fs::remove_dir_all(&run_dir)
            .with_context(|| format!("removing {}", run_dir.display()))?;
    }
    fs::create_dir_all(&run_dir).with_context(|| format!("creating {}", run_dir.display()))?;

    let model_ckpt = run_dir.join("model.ckpt");
    let plot_path = run_dir.join("metrics.png");
    let runlog = RunLog::new(run_dir.join("log.txt"));
    let batch_size = args.batch_size.max(1);

    runlog.line(args.summary());

    <ADBackend as Backend>::seed(args.seed);
    let device = <ADBackend as Backend>::Device::default();

    let dataset = get_dataset(args.dataset_to, &cfg.data_root, false, args.seed)
        .with_context(|| format!("loading dataset {}", args.dataset_to))?;
    let train_set: Arc<dyn ImageSource> = if args.size > 0 {
        Arc::new(Subset::range(dataset.train_set.clone(), 0..args.size as usize))
    } else {
        Arc::new(Subset::full(dataset.train_set.clone()))
    };
    let mut train_loader = ImageLoader::new(train_set, batch_size, Some(args.seed));
    let steps_per_epoch = train_loader.len();
    let valid_set = dataset.valid_set.clone();

    if !checkpoint::exists(&args.model_from) {
        anyhow::bail!("no classifier checkpoint at {}", args.model_from.display());
    }
    let classifier_state: CheckpointState<ResNetConfig> = checkpoint::load_state(&args.model_from)?;
    let classifier = checkpoint::load_model::<ADBackend, _>(
        &args.model_from,
        classifier_state.config.init::<ADBackend>(&device),
        &device,
    )?
    .no_grad();
    runlog.line(format!(
        "Loading model {} ({} epochs), valid acc {:.3}",
        args.model_from.display(),
        classifier_state.epoch,
        classifier_state.acc
    ));
    let classifier_channels = classifier_state
        .input_shape
        .map_or(classifier_state.config.in_channels, |shape| shape[0]);

    let had_checkpoint = checkpoint::exists(&model_ckpt);
    let (mut transfer, mut optim, init_epoch, mut logs, mut best_acc, transfer_config) =
        if had_checkpoint && !args.reset {
            let state: CheckpointState<TransferNetConfig> = checkpoint::load_state(&model_ckpt)?;
            let transfer = checkpoint::load_model::<ADBackend, _>(
                &model_ckpt,
                state.config.init::<ADBackend>(&device)?,
                &device,
            )?;
            let optim = checkpoint::load_optimizer::<ADBackend, TransferNet<ADBackend>, _>(
                &model_ckpt,
                AdamConfig::new().init::<ADBackend, TransferNet<ADBackend>>(),
                &device,
            )?;
            runlog.line(format!(
                "Loading transfer model {} ({} epochs), valid acc {:.3}",
                model_ckpt.display(),
                state.epoch,
                state.acc
            ));
            (transfer, optim, state.epoch, state.logs, state.acc, state.config)
        } else {
            let config =
                TransferNetConfig::for_kind(args.network, dataset.in_channels, classifier_channels);
            let transfer = config.init::<ADBackend>(&device)?;
            let optim = AdamConfig::new().init::<ADBackend, TransferNet<ADBackend>>();
            (transfer, optim, 0, MetricLog::new(), 0.0, config)
        };

    let baseline_acc = baseline_accuracy(
        &classifier,
        dataset.in_channels,
        classifier_channels,
        &valid_set,
        batch_size,
        &device,
    )?;
    let mut valid_acc =
        full_accuracy(&transfer, &classifier, &valid_set, batch_size, Some("valid"), &device)?;

    let mut epochs = init_epoch;
    let mut valid_history = Vec::new();
    let mut saved_epochs = Vec::new();
    if !had_checkpoint || args.resume_training || args.reset {
        if transfer_config.kind() != args.network {
            tracing::warn!(
                "--network {} ignored; resuming the saved {} transfer model",
                args.network,
                transfer_config.kind()
            );
        }
        runlog.line(format!(
            "Training transfer model {}, params:\t{:.2} K",
            transfer_config.kind(),
            transfer.num_params() as f64 / 1000.0
        ));

        let loss_fn = CrossEntropyLossConfig::new().init(&device);
        let last_epoch = init_epoch + args.num_epochs;

        for epoch in init_epoch..last_epoch {
            let mut metrics: Vec<(&str, f64)> = Vec::new();
            let mut batches = train_loader.iter();
            while let Some(batch) = batches.next_batch::<ADBackend>(&device)? {
                let transformed = transfer.forward(batch.images, NormMode::Train);
                let out = classifier.forward_with_stats(transformed.clone(), NormMode::Eval);

                let loss_bn = if args.f_stats != 0.0 {
                    bn_matching_loss(&out.norm_stats, &device).mul_scalar(args.f_stats)
                } else {
                    Tensor::zeros([1], &device)
                };
                let loss_reg = if args.f_reg != 0.0 {
                    (moment_penalty(transformed.clone()) + total_variation(transformed))
                        .mul_scalar(args.f_reg)
                } else {
                    Tensor::zeros([1], &device)
                };

                metrics = vec![
                    ("acc", accuracy(out.logits.clone(), batch.labels.clone())),
                    ("loss_bn", scalar(loss_bn.clone().detach())),
                    ("loss_reg", scalar(loss_reg.clone().detach())),
                ];
                let mut loss = loss_bn + loss_reg;
                if !args.unsupervised {
                    let loss_crit = loss_fn.forward(out.logits, batch.labels);
                    metrics.push(("loss_crit", scalar(loss_crit.clone().detach())));
                    loss = loss + loss_crit;
                }
                logs.push_all(&metrics);

                let grads = GradientsParams::from_grads(loss.backward(), &transfer);
                transfer = optim.step(args.lr, transfer, grads);
            }
            epochs = epoch + 1;

            let previous = valid_acc;
            valid_acc =
                full_accuracy(&transfer, &classifier, &valid_set, batch_size, None, &device)?;
            metrics.push(("valid_acc", valid_acc));
            logs.extend("val_acc", linspace(previous, valid_acc, steps_per_epoch));

            let line = metrics
                .iter()
                .map(|(k, v)| format!("{k} {v:.3}"))
                .collect::<Vec<_>>()
                .join(", ");
            runlog.line(format!("[{}/{last_epoch}] {line}", epoch + 1));

            let samples = write_samples(&transfer, &valid_set, &run_dir, epoch + 1, args.sample_every)?;

            valid_history.push(valid_acc);
            if !args.save_best || valid_acc > best_acc {
                pretty_plot(&logs, steps_per_epoch, PLOT_SMOOTHING, &plot_path)
                    .with_context(|| format!("writing plot {}", plot_path.display()))?;
                best_acc = valid_acc;
                saved_epochs.push(epoch + 1);
                if let Some(samples) = samples {
                    save_image(&tensor_grid(samples)?, &run_dir.join("sample_best.png"))?;
                }

                runlog.line(format!("Saving transfer_model to {}", model_ckpt.display()));
                let state = CheckpointState {
                    epoch: epoch + 1,
                    acc: best_acc,
                    logs: logs.clone(),
                    input_shape: Some(dataset.input_shape),
                    classes: Some(dataset.classes.clone()),
                    config: transfer_config.clone(),
                };
                save_checkpoint(&model_ckpt, &transfer, &optim, &state)?;
            }
        }
    }

    Ok(TransferSummary {
        run_dir,
        epochs,
        best_acc,
        valid_acc,
        valid_history,
        saved_epochs,
        baseline_acc,
    })
}

/// Validation accuracy of the bare classifier on the new inputs, adapting
/// channels when possible. `None` when the channel counts cannot be bridged.
fn baseline_accuracy(
    classifier: &ResNet<ADBackend>,
    in_channels: usize,
    classifier_channels: usize,
    valid_set: &Arc<dyn ImageSource>,
    batch_size: usize,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<Option<f64>> {
    let adapter = adapt_channels::<TrainBackend>(in_channels, classifier_channels);
    if adapter.is_none() && in_channels != classifier_channels {
        tracing::warn!(
            "no channel adapter from {in_channels} to {classifier_channels} channels; skipping baseline"
        );
        return Ok(None);
    }
    let classifier = classifier.valid();
    let acc = test_accuracy::<TrainBackend, _>(
        |x| classifier.forward(x),
        BatchIter::sequential(valid_set.clone(), batch_size),
        adapter,
        Some("valid no transfer"),
        device,
    )?;
    Ok(Some(acc))
}

fn full_accuracy(
    transfer: &TransferNet<ADBackend>,
    classifier: &ResNet<ADBackend>,
    valid_set: &Arc<dyn ImageSource>,
    batch_size: usize,
    name: Option<&str>,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<f64> {
    let transfer = transfer.valid();
    let classifier = classifier.valid();
    test_accuracy::<TrainBackend, _>(
        |x| classifier.forward(transfer.forward(x, NormMode::Eval)),
        BatchIter::sequential(valid_set.clone(), batch_size),
        None,
        name,
        device,
    )
}

/// Write `sample_input.png` and, every `sample_every` epochs, `sample_<epoch>.png`.
/// Returns the transfer outputs for the sample batch.
fn write_samples(
    transfer: &TransferNet<ADBackend>,
    valid_set: &Arc<dyn ImageSource>,
    run_dir: &Path,
    epoch: usize,
    sample_every: usize,
) -> anyhow::Result<Option<Tensor<TrainBackend, 4>>> {
    let device = <TrainBackend as Backend>::Device::default();
    let Some(view) = BatchIter::sequential(valid_set.clone(), SAMPLE_COUNT)
        .next_batch::<TrainBackend>(&device)?
    else {
        return Ok(None);
    };
    save_image(&tensor_grid(view.images.clone())?, &run_dir.join("sample_input.png"))?;

    let samples = transfer.valid().forward(view.images, NormMode::Eval);
    if sample_every > 0 && epoch % sample_every == 0 {
        save_image(
            &tensor_grid(samples.clone())?,
            &run_dir.join(format!("sample_{epoch:02}.png")),
        )?;
    }
    Ok(Some(samples))
}

fn save_checkpoint<O>(
    ckpt: &Path,
    transfer: &TransferNet<ADBackend>,
    optim: &O,
    state: &CheckpointState<TransferNetConfig>,
) -> anyhow::Result<()>
where
    O: Optimizer<TransferNet<ADBackend>, ADBackend>,
{
    checkpoint::save::<ADBackend, _, _, _>(ckpt, transfer, optim, state)
        .with_context(|| format!("saving transfer checkpoint {}", ckpt.display()))
}
