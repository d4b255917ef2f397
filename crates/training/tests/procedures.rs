use std::fs;
use std::path::Path;

use clap::Parser;
use image::{Luma, GrayImage};
use models::{ResNetConfig, TransferNetConfig};
use training::checkpoint::{self, CheckpointState};
use training::{run_train, run_transfer, TrainArgs, TransferArgs};

fn write_mnist(root: &Path) {
    let splits = [("train", 8), ("valid", 2)];
    for (split, per_class) in splits {
        for (label, class) in ["0", "1"].iter().enumerate() {
            let dir = root.join("MNIST").join(split).join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let img = GrayImage::from_fn(28, 28, |x, y| {
                    let on = if label == 0 { x < 14 } else { y < 14 };
                    Luma([if on { 200 + i as u8 } else { 10 }])
                });
                img.save(dir.join(format!("{i}.png"))).unwrap();
            }
        }
    }
}

fn train_args(data: &Path, ckpt: &Path, epochs: usize) -> TrainArgs {
    train_args_with(data, ckpt, epochs, &[])
}

fn train_args_with(data: &Path, ckpt: &Path, epochs: usize, extra: &[&str]) -> TrainArgs {
    let mut argv: Vec<String> = [
        "train",
        "--dataset",
        "MNIST",
        "--network",
        "simplecnn",
        "--ckpt",
        ckpt.to_str().unwrap(),
        "--num-epochs",
        &epochs.to_string(),
        "--batch-size",
        "4",
        "--lr",
        "0.001",
        "--log-every",
        "2",
        "--data-root",
        data.to_str().unwrap(),
        "--workers",
        "2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    argv.extend(extra.iter().map(|s| s.to_string()));
    TrainArgs::parse_from(argv)
}

/// Epochs a `--save-best` run should checkpoint: every strict improvement
/// over the running best, starting from `best`.
fn improving_epochs(history: &[f64], first_epoch: usize, mut best: f64) -> Vec<usize> {
    let mut saved = Vec::new();
    for (i, acc) in history.iter().enumerate() {
        if *acc > best {
            best = *acc;
            saved.push(first_epoch + i + 1);
        }
    }
    saved
}

fn best_epoch(history: &[f64], first_epoch: usize) -> (f64, usize) {
    let mut best = (f64::NEG_INFINITY, 0);
    for (i, acc) in history.iter().enumerate() {
        if *acc > best.0 {
            best = (*acc, first_epoch + i + 1);
        }
    }
    best
}

fn transfer_args(ckpt: &Path, run_dir: &Path, data: &Path, extra: &[&str]) -> TransferArgs {
    let mut argv: Vec<String> = [
        "transfer",
        "--dataset-to",
        "MNIST",
        "--network",
        "Conv",
        "--size",
        "8",
        "--num-epochs",
        "2",
        "--batch-size",
        "4",
        "--lr",
        "0.001",
        "--f-reg",
        "0.1",
        "--sample-every",
        "1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for (flag, path) in [("--model-from", ckpt), ("--ckpt", run_dir), ("--data-root", data)] {
        argv.push(flag.to_string());
        argv.push(path.display().to_string());
    }
    argv.extend(extra.iter().map(|s| s.to_string()));
    TransferArgs::parse_from(argv)
}

#[test]
fn train_resume_then_transfer() {
    let temp = tempfile::tempdir().unwrap();
    let data = temp.path().join("data");
    write_mnist(&data);
    let ckpt = temp.path().join("models").join("mnist.ckpt");

    let summary = run_train(train_args(&data, &ckpt, 2)).unwrap();
    assert_eq!(summary.epochs, 2);
    let state: CheckpointState<ResNetConfig> = checkpoint::load_state(&ckpt).unwrap();
    assert_eq!(state.epoch, 2);
    assert_eq!(state.input_shape, Some([1, 28, 28]));
    assert_eq!(state.classes, Some(vec!["0".to_string(), "1".to_string()]));
    // 16 images / batch 4 = 4 steps per epoch
    assert_eq!(state.logs.len("acc"), 8);
    assert_eq!(state.logs.len("loss"), 8);
    assert_eq!(state.logs.len("val_acc"), 8);
    assert!(temp.path().join("models").join("mnist.png").is_file());
    let log = fs::read_to_string(temp.path().join("models").join("mnist.txt")).unwrap();
    assert!(log.contains("Training SimpleCnn, params:\t"));
    assert!(log.contains("[0/2:  0] acc "));
    assert!(log.contains(&format!("Saving model to {}", ckpt.display())));

    // resuming only runs the missing epoch and keeps the history
    let summary = run_train(train_args(&data, &ckpt, 3)).unwrap();
    assert_eq!(summary.epochs, 3);
    let state: CheckpointState<ResNetConfig> = checkpoint::load_state(&ckpt).unwrap();
    assert_eq!(state.epoch, 3);
    assert_eq!(state.logs.len("acc"), 12);
    let log = fs::read_to_string(temp.path().join("models").join("mnist.txt")).unwrap();
    assert!(log.contains("Loading model"));

    let run_dir = temp.path().join("transfer").join("run");
    let summary = run_transfer(transfer_args(&ckpt, &run_dir, &data, &[])).unwrap();
    assert_eq!(summary.epochs, 2);
    assert!(summary.baseline_acc.is_some());
    for file in [
        "metrics.png",
        "log.txt",
        "sample_input.png",
        "sample_01.png",
        "sample_02.png",
        "sample_best.png",
    ] {
        assert!(run_dir.join(file).is_file(), "missing {file}");
    }
    let model_ckpt = run_dir.join("model.ckpt");
    let state: CheckpointState<TransferNetConfig> = checkpoint::load_state(&model_ckpt).unwrap();
    assert_eq!(state.epoch, 2);
    assert_eq!((state.config.in_channels, state.config.out_channels), (1, 1));
    // 8 images / batch 4 = 2 steps per epoch
    for metric in ["acc", "loss_bn", "loss_reg", "loss_crit", "val_acc"] {
        assert_eq!(state.logs.len(metric), 4, "{metric}");
    }
    let log = fs::read_to_string(run_dir.join("log.txt")).unwrap();
    assert!(log.contains("[1/2] acc "));
    assert!(log.contains("valid_acc "));

    // an existing transfer checkpoint is only evaluated unless asked to resume
    let summary = run_transfer(transfer_args(&ckpt, &run_dir, &data, &[])).unwrap();
    assert_eq!(summary.epochs, 2);
    let log = fs::read_to_string(run_dir.join("log.txt")).unwrap();
    assert!(log.contains("Loading transfer model"));

    // the saved network kind wins over --network when resuming
    let resumed = transfer_args(
        &ckpt,
        &run_dir,
        &data,
        &["--resume-training", "--unsupervised", "--network", "UnetPlusPlus"],
    );
    let summary = run_transfer(resumed).unwrap();
    assert_eq!(summary.epochs, 4);
    let state: CheckpointState<TransferNetConfig> = checkpoint::load_state(&model_ckpt).unwrap();
    assert_eq!(state.logs.len("loss_bn"), 8);
    assert_eq!(state.logs.len("loss_crit"), 4);
    let log = fs::read_to_string(run_dir.join("log.txt")).unwrap();
    assert!(log.contains("Training transfer model Conv, params:"));
    assert!(!log.contains("Training transfer model UnetPlusPlus"));
}

#[test]
fn train_save_best_keeps_best_epoch() {
    let temp = tempfile::tempdir().unwrap();
    let data = temp.path().join("data");
    write_mnist(&data);
    let ckpt = temp.path().join("models").join("best.ckpt");

    let summary = run_train(train_args_with(&data, &ckpt, 4, &["--save-best"])).unwrap();
    assert_eq!(summary.epochs, 4);
    assert_eq!(summary.valid_history.len(), 4);
    let expected = improving_epochs(&summary.valid_history, 0, 0.0);
    assert_eq!(summary.saved_epochs, expected);

    let log = fs::read_to_string(temp.path().join("models").join("best.txt")).unwrap();
    assert_eq!(log.matches("Saving model to").count(), expected.len());

    if expected.is_empty() {
        assert!(!checkpoint::exists(&ckpt));
        return;
    }
    let (best, epoch) = best_epoch(&summary.valid_history, 0);
    let state: CheckpointState<ResNetConfig> = checkpoint::load_state(&ckpt).unwrap();
    assert_eq!(state.acc, best);
    assert_eq!(state.epoch, epoch);
    assert_eq!(summary.best_acc, best);
    // the history stops at the last improving epoch
    assert_eq!(state.logs.len("acc"), 4 * epoch);
}

#[test]
fn transfer_save_best_keeps_best_epoch() {
    let temp = tempfile::tempdir().unwrap();
    let data = temp.path().join("data");
    write_mnist(&data);
    let ckpt = temp.path().join("models").join("mnist.ckpt");
    run_train(train_args(&data, &ckpt, 1)).unwrap();

    let run_dir = temp.path().join("transfer").join("best");
    let args = transfer_args(&ckpt, &run_dir, &data, &["--num-epochs", "4", "--save-best"]);
    let summary = run_transfer(args).unwrap();
    assert_eq!(summary.epochs, 4);
    assert_eq!(summary.valid_history.len(), 4);
    let expected = improving_epochs(&summary.valid_history, 0, 0.0);
    assert_eq!(summary.saved_epochs, expected);

    let log = fs::read_to_string(run_dir.join("log.txt")).unwrap();
    assert_eq!(log.matches("Saving transfer_model to").count(), expected.len());

    let model_ckpt = run_dir.join("model.ckpt");
    if expected.is_empty() {
        assert!(!checkpoint::exists(&model_ckpt));
        assert!(!run_dir.join("sample_best.png").exists());
        return;
    }
    let (best, epoch) = best_epoch(&summary.valid_history, 0);
    let state: CheckpointState<TransferNetConfig> = checkpoint::load_state(&model_ckpt).unwrap();
    assert_eq!(state.acc, best);
    assert_eq!(state.epoch, epoch);
    assert_eq!(state.logs.len("loss_bn"), 2 * epoch);
    assert!(run_dir.join("sample_best.png").is_file());
}

#[test]
fn transfer_without_classifier_fails() {
    let temp = tempfile::tempdir().unwrap();
    let args = TransferArgs::parse_from([
        "transfer",
        "--dataset-to",
        "Shapes",
        "--model-from",
        temp.path().join("missing.ckpt").to_str().unwrap(),
        "--ckpt",
        temp.path().join("run").to_str().unwrap(),
    ]);
    let err = run_transfer(args).unwrap_err();
    assert!(err.to_string().contains("no classifier checkpoint"));
}

#[test]
fn train_checkpoint_defaults_to_models_root() {
    let args = TrainArgs::parse_from(["train", "--dataset", "mnist", "--network", "resnet8"]);
    let cfg = cli_support::RunConfig::default();
    assert_eq!(
        args.checkpoint_path(&cfg),
        Path::new("models").join("MNIST_resnet8.ckpt")
    );
    assert_eq!(args.num_epochs, 5);
    assert_eq!(args.batch_size, 64);
}
