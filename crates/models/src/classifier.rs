//! ResNet-style image classifiers whose forward pass exposes norm statistics.

use burn::module::Module;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::blocks::{BasicBlock, ConvNorm};
use crate::norm::{NormMode, NormStats};
use crate::ModelError;

/// Architecture of a `ResNet`; stored next to checkpoints so they can be rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResNetConfig {
    pub name: String,
    pub in_channels: usize,
    pub num_classes: usize,
    /// Channel width of each stage.
    pub widths: Vec<usize>,
    /// Basic blocks per stage.
    pub blocks: Vec<usize>,
}

impl ResNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        ResNet::new(self, device)
    }
}

/// Network names accepted by `network_config`.
pub const NETWORKS: [&str; 4] = ["resnet18", "resnet34", "resnet8", "simplecnn"];

/// Resolve a network name (case-insensitive) into a classifier architecture.
pub fn network_config(
    name: &str,
    in_channels: usize,
    num_classes: usize,
) -> Result<ResNetConfig, ModelError> {
    let (canonical, widths, blocks) = match name.trim().to_ascii_lowercase().as_str() {
        "resnet18" => ("ResNet18", vec![64, 128, 256, 512], vec![2, 2, 2, 2]),
        "resnet34" => ("ResNet34", vec![64, 128, 256, 512], vec![3, 4, 6, 3]),
        "resnet8" => ("ResNet8", vec![16, 32, 64], vec![1, 1, 1]),
        "simplecnn" => ("SimpleCnn", vec![32, 64], vec![1, 1]),
        _ => {
            return Err(ModelError::UnknownNetwork {
                name: name.to_string(),
                expected: NETWORKS.join(", "),
            })
        }
    };
    Ok(ResNetConfig {
        name: canonical.to_string(),
        in_channels,
        num_classes,
        widths,
        blocks,
    })
}

/// Build the named classifier with fresh weights.
pub fn get_model<B: Backend>(
    name: &str,
    in_channels: usize,
    num_classes: usize,
    device: &B::Device,
) -> Result<ResNet<B>, ModelError> {
    Ok(network_config(name, in_channels, num_classes)?.init(device))
}

/// Classifier logits plus the statistics seen by every norm layer, in network order.
#[derive(Debug, Clone)]
pub struct ClassifierOutput<B: Backend> {
    pub logits: Tensor<B, 2>,
    pub norm_stats: Vec<NormStats<B>>,
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: ConvNorm<B>,
    blocks: Vec<BasicBlock<B>>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    in_channels: usize,
    num_classes: usize,
}

impl<B: Backend> ResNet<B> {
    pub fn new(cfg: &ResNetConfig, device: &B::Device) -> Self {
        let stem_width = cfg.widths.first().copied().unwrap_or(16);
        let stem = ConvNorm::new(cfg.in_channels, stem_width, 3, 1, device);
        let mut blocks = Vec::new();
        let mut in_width = stem_width;
        for (stage, (&width, &count)) in cfg.widths.iter().zip(cfg.blocks.iter()).enumerate() {
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(in_width, width, stride, device));
                in_width = width;
            }
        }
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let head = LinearConfig::new(in_width, cfg.num_classes.max(1)).init(device);
        Self {
            stem,
            blocks,
            pool,
            head,
            in_channels: cfg.in_channels,
            num_classes: cfg.num_classes.max(1),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Inference logits `[N, classes]` using running statistics.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_with_stats(x, NormMode::Eval).logits
    }

    pub fn forward_with_stats(&self, x: Tensor<B, 4>, mode: NormMode) -> ClassifierOutput<B> {
        let mut norm_stats = Vec::new();
        let mut x = relu(self.stem.forward(x, mode, &mut norm_stats));
        for block in &self.blocks {
            x = block.forward(x, mode, &mut norm_stats);
        }
        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        let logits = self.head.forward(x.reshape([batch, channels]));
        ClassifierOutput { logits, norm_stats }
    }
}
