use burn::backend::NdArray;
use burn::tensor::{Distribution, Tensor};
use models::{
    get_model, get_transfer_model, network_config, NormMode, TransferKind, TransferNetConfig,
};

type B = NdArray<f32>;

fn random_images(n: usize, c: usize, h: usize, w: usize) -> Tensor<B, 4> {
    let device = Default::default();
    Tensor::<B, 4>::random([n, c, h, w], Distribution::Normal(0.0, 1.0), &device)
}

#[test]
fn classifier_logits_have_class_dim() {
    let device = Default::default();
    let model = get_model::<B>("resnet8", 3, 10, &device).expect("resnet8");
    let logits = model.forward(random_images(2, 3, 32, 32));
    assert_eq!(logits.dims(), [2, 10]);
}

#[test]
fn stats_cover_every_norm_layer_in_order() {
    let device = Default::default();
    let model = get_model::<B>("SimpleCNN", 1, 4, &device).expect("simplecnn");
    let out = model.forward_with_stats(random_images(3, 1, 28, 28), NormMode::Train);
    // stem + block1 (2 convs) + block2 (2 convs + projection)
    assert_eq!(out.norm_stats.len(), 6);
    let widths: Vec<usize> = out.norm_stats.iter().map(|s| s.mean.dims()[0]).collect();
    assert_eq!(widths, vec![32, 32, 32, 64, 64, 64]);
    for stats in &out.norm_stats {
        assert_eq!(stats.var.dims(), stats.running_var.dims());
    }
}

#[test]
fn eval_mode_leaves_running_stats_alone() {
    let device = Default::default();
    let model = get_model::<B>("resnet8", 3, 10, &device).expect("resnet8");
    let x = random_images(4, 3, 16, 16).add_scalar(3.0);
    let first = model.forward_with_stats(x.clone(), NormMode::Eval);
    let second = model.forward_with_stats(x, NormMode::Eval);
    let a = first.norm_stats[0].running_mean.clone().into_data().to_vec::<f32>().expect("f32");
    let b = second.norm_stats[0].running_mean.clone().into_data().to_vec::<f32>().expect("f32");
    assert_eq!(a, b);
    assert!(a.iter().all(|v| *v == 0.0));
    // fresh running mean is zero, the shifted input is not
    let batch_mean: f32 = first.norm_stats[0].mean.clone().abs().sum().into_scalar();
    assert!(batch_mean > 0.0);
}

#[test]
fn unknown_network_is_an_error() {
    assert!(network_config("vgg11", 3, 10).is_err());
    let cfg = network_config("ResNet34", 3, 10).expect("resnet34");
    assert_eq!(cfg.blocks, vec![3, 4, 6, 3]);
    assert_eq!(cfg.name, "ResNet34");
}

fn small_transfer(nested: bool, in_channels: usize, out_channels: usize) -> TransferNetConfig {
    TransferNetConfig {
        in_channels,
        out_channels,
        encoder_channels: vec![4, 8, 8],
        decoder_channels: vec![8, 4],
        nested,
    }
}

#[test]
fn unet_keeps_odd_spatial_sizes() {
    let device = Default::default();
    for nested in [false, true] {
        let net = small_transfer(nested, 1, 3).init::<B>(&device).expect("init");
        let out = net.forward(random_images(2, 1, 28, 28), NormMode::Train);
        assert_eq!(out.dims(), [2, 3, 28, 28]);
        let out = net.forward(random_images(1, 1, 15, 13), NormMode::Eval);
        assert_eq!(out.dims(), [1, 3, 15, 13]);
    }
}

#[test]
fn conv_transfer_is_a_single_block() {
    let device = Default::default();
    let net = get_transfer_model::<B>(TransferKind::Conv, 3, 1, &device).expect("conv");
    let out = net.forward(random_images(2, 3, 8, 8), NormMode::Train);
    assert_eq!(out.dims(), [2, 1, 8, 8]);
}

#[test]
fn mismatched_levels_are_rejected() {
    let device = Default::default();
    let mut cfg = small_transfer(false, 3, 3);
    cfg.decoder_channels.push(2);
    assert!(cfg.init::<B>(&device).is_err());
}
