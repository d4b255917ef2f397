use burn::backend::{ndarray::NdArray, Autodiff};
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{Distribution, Int, Tensor, TensorData};
use models::{network_config, NormMode, ResNet, ResNetConfig};
use training::checkpoint::{self, CheckpointState};
use training::MetricLog;

type ADBackend = Autodiff<NdArray<f32>>;

#[test]
fn model_optimizer_and_state_survive_a_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("clf.ckpt");
    let device = Default::default();

    let config = network_config("simplecnn", 1, 3).unwrap();
    let mut model = config.init::<ADBackend>(&device);
    let mut optim = AdamConfig::new().init::<ADBackend, ResNet<ADBackend>>();

    // one step so the optimizer and the running statistics carry state
    let x = Tensor::<ADBackend, 4>::random([4, 1, 12, 12], Distribution::Normal(0.0, 1.0), &device);
    let y = Tensor::<ADBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 1, 2, 1], [4]), &device);
    let out = model.forward_with_stats(x, NormMode::Train);
    let loss = CrossEntropyLossConfig::new().init(&device).forward(out.logits, y);
    let grads = GradientsParams::from_grads(loss.backward(), &model);
    model = optim.step(1e-3, model, grads);

    let mut logs = MetricLog::new();
    logs.push_all(&[("acc", 0.25), ("loss", 1.5)]);
    let state = CheckpointState {
        epoch: 1,
        acc: 0.5,
        logs,
        input_shape: Some([1, 12, 12]),
        classes: Some(vec!["a".into(), "b".into(), "c".into()]),
        config: config.clone(),
    };

    assert!(!checkpoint::exists(&dir));
    checkpoint::save::<ADBackend, _, _, _>(&dir, &model, &optim, &state).unwrap();
    assert!(checkpoint::exists(&dir));
    assert!(dir.join("model.bin").is_file());
    assert!(dir.join("optim.bin").is_file());

    let loaded_state: CheckpointState<ResNetConfig> = checkpoint::load_state(&dir).unwrap();
    assert_eq!(loaded_state, state);

    let restored = checkpoint::load_model::<ADBackend, _>(
        &dir,
        loaded_state.config.init::<ADBackend>(&device),
        &device,
    )
    .unwrap();
    let sample = Tensor::random([2, 1, 12, 12], Distribution::Normal(0.0, 1.0), &device);
    let expected = model.valid().forward(sample.clone()).into_data().to_vec::<f32>().unwrap();
    let actual = restored.valid().forward(sample).into_data().to_vec::<f32>().unwrap();
    assert_eq!(expected, actual);

    checkpoint::load_optimizer::<ADBackend, ResNet<ADBackend>, _>(
        &dir,
        AdamConfig::new().init::<ADBackend, ResNet<ADBackend>>(),
        &device,
    )
    .unwrap();
}

#[test]
fn missing_state_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let err = checkpoint::load_state::<ResNetConfig>(&temp.path().join("nope")).unwrap_err();
    assert!(matches!(err, checkpoint::CheckpointError::Missing(_)));
}
