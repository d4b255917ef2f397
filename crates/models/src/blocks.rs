//! Convolution building blocks shared by the classifier and transfer networks.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::norm::{NormMode, NormStats, StatBatchNorm};

/// Convolution (no bias) followed by `StatBatchNorm`.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: StatBatchNorm<B>,
}

impl<B: Backend> ConvNorm<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let pad = kernel / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_bias(false)
            .init(device);
        Self {
            conv,
            norm: StatBatchNorm::new(out_channels, device),
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        mode: NormMode,
        stats: &mut Vec<NormStats<B>>,
    ) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let (x, s) = self.norm.forward(x, mode);
        stats.push(s);
        x
    }
}

/// Two 3x3 conv-norm-ReLU stages; the unit of every U-Net node.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    first: ConvNorm<B>,
    second: ConvNorm<B>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            first: ConvNorm::new(in_channels, out_channels, 3, 1, device),
            second: ConvNorm::new(out_channels, out_channels, 3, 1, device),
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        mode: NormMode,
        stats: &mut Vec<NormStats<B>>,
    ) -> Tensor<B, 4> {
        let x = relu(self.first.forward(x, mode, stats));
        relu(self.second.forward(x, mode, stats))
    }
}

/// ResNet basic block with an optional 1x1 projection shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvNorm<B>,
    conv2: ConvNorm<B>,
    shortcut: Option<ConvNorm<B>>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || in_channels != out_channels)
            .then(|| ConvNorm::new(in_channels, out_channels, 1, stride, device));
        Self {
            conv1: ConvNorm::new(in_channels, out_channels, 3, stride, device),
            conv2: ConvNorm::new(out_channels, out_channels, 3, 1, device),
            shortcut,
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        mode: NormMode,
        stats: &mut Vec<NormStats<B>>,
    ) -> Tensor<B, 4> {
        let out = relu(self.conv1.forward(x.clone(), mode, stats));
        let out = self.conv2.forward(out, mode, stats);
        let identity = match &self.shortcut {
            Some(proj) => proj.forward(x, mode, stats),
            None => x,
        };
        relu(out + identity)
    }
}
