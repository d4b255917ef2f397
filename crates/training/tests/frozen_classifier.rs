use burn::backend::{ndarray::NdArray, Autodiff};
use burn::module::Module;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor, TensorData};
use models::{network_config, NormMode, ResNet, TransferKind, TransferNet, TransferNetConfig};
use training::losses::{bn_matching_loss, scalar};

type ADBackend = Autodiff<NdArray<f32>>;

fn running_means(classifier: &ResNet<ADBackend>, x: Tensor<ADBackend, 4>) -> Vec<TensorData> {
    classifier
        .forward_with_stats(x, NormMode::Eval)
        .norm_stats
        .into_iter()
        .map(|stats| stats.running_mean.into_data())
        .collect()
}

#[test]
fn only_the_transfer_network_learns() {
    <ADBackend as Backend>::seed(7);
    let device = Default::default();

    let classifier = network_config("simplecnn", 1, 2)
        .unwrap()
        .init::<ADBackend>(&device)
        .no_grad();
    let mut transfer = TransferNetConfig::for_kind(TransferKind::Conv, 1, 1)
        .init::<ADBackend>(&device)
        .unwrap();
    let mut optim = AdamConfig::new().init::<ADBackend, TransferNet<ADBackend>>();

    // shifted away from the classifier's running statistics
    let x = Tensor::<ADBackend, 4>::random([4, 1, 12, 12], Distribution::Normal(2.0, 3.0), &device);
    let fixed = Tensor::<ADBackend, 4>::random([2, 1, 12, 12], Distribution::Default, &device);
    let logits_before = classifier.forward(fixed.clone()).into_data();
    let means_before = running_means(&classifier, fixed.clone());

    let mut losses = Vec::new();
    for _ in 0..5 {
        let transformed = transfer.forward(x.clone(), NormMode::Train);
        let out = classifier.forward_with_stats(transformed, NormMode::Eval);
        let loss = bn_matching_loss(&out.norm_stats, &device);
        losses.push(scalar(loss.clone().detach()));

        let mut grads = loss.backward();
        let classifier_grads = GradientsParams::from_module::<ADBackend, _>(&mut grads, &classifier);
        assert!(classifier_grads.is_empty(), "classifier received {} gradients", classifier_grads.len());
        let transfer_grads = GradientsParams::from_module::<ADBackend, _>(&mut grads, &transfer);
        assert!(!transfer_grads.is_empty());
        transfer = optim.step(1e-3, transfer, transfer_grads);
    }

    assert!(
        losses[losses.len() - 1] < losses[0],
        "statistic loss did not drop: {losses:?}"
    );
    classifier
        .forward(fixed.clone())
        .into_data()
        .assert_eq(&logits_before, true);
    for (after, before) in running_means(&classifier, fixed).iter().zip(&means_before) {
        after.assert_eq(before, true);
    }
}
