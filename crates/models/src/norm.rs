//! Batch normalization that reports the statistics of its input.

use burn::module::{Module, Param, RunningState};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

const DEFAULT_MOMENTUM: f64 = 0.1;
const DEFAULT_EPSILON: f64 = 1e-5;

/// Whether norm layers use batch statistics (and update running ones) or running statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormMode {
    Train,
    Eval,
}

/// Per-channel statistics observed by one norm layer during a forward pass.
///
/// `mean`/`var` are computed from the layer input over (N, H, W) and stay
/// attached to the autograd graph; `var` is the unbiased estimate. The running
/// values are the layer's stored statistics before this pass, detached.
#[derive(Debug, Clone)]
pub struct NormStats<B: Backend> {
    pub mean: Tensor<B, 1>,
    pub var: Tensor<B, 1>,
    pub running_mean: Tensor<B, 1>,
    pub running_var: Tensor<B, 1>,
}

/// 2-D batch normalization over `[N, C, H, W]` inputs.
#[derive(Module, Debug)]
pub struct StatBatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    pub running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}

impl<B: Backend> StatBatchNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: RunningState::new(Tensor::zeros([channels], device)),
            running_var: RunningState::new(Tensor::ones([channels], device)),
            momentum: DEFAULT_MOMENTUM,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, mode: NormMode) -> (Tensor<B, 4>, NormStats<B>) {
        let device = input.device();
        let [batch, channels, height, width] = input.dims();
        let count = batch * height * width;

        let flat = input.clone().swap_dims(0, 1).reshape([channels, count]);
        let mean = flat.clone().mean_dim(1);
        let var_biased = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);
        let correction = if count > 1 {
            count as f64 / (count - 1) as f64
        } else {
            1.0
        };
        let mean = mean.reshape([channels]);
        let var_biased = var_biased.reshape([channels]);
        let var = var_biased.clone().mul_scalar(correction);

        let (output, running_mean, running_var) = match mode {
            NormMode::Train => {
                let running_mean = self.running_mean.value_sync().to_device(&device);
                let running_var = self.running_var.value_sync().to_device(&device);
                let m = self.momentum;
                self.running_mean.update(
                    running_mean
                        .clone()
                        .mul_scalar(1.0 - m)
                        .add(mean.clone().detach().mul_scalar(m))
                        .detach(),
                );
                self.running_var.update(
                    running_var
                        .clone()
                        .mul_scalar(1.0 - m)
                        .add(var.clone().detach().mul_scalar(m))
                        .detach(),
                );
                let out = self.normalize(input, mean.clone(), var_biased);
                (out, running_mean, running_var)
            }
            NormMode::Eval => {
                let running_mean = self.running_mean.value().to_device(&device);
                let running_var = self.running_var.value().to_device(&device);
                let out = self.normalize(input, running_mean.clone(), running_var.clone());
                (out, running_mean, running_var)
            }
        };

        (
            output,
            NormStats {
                mean,
                var,
                running_mean: running_mean.detach(),
                running_var: running_var.detach(),
            },
        )
    }

    fn normalize(&self, input: Tensor<B, 4>, mean: Tensor<B, 1>, var: Tensor<B, 1>) -> Tensor<B, 4> {
        let channels = mean.dims()[0];
        let shape = [1, channels, 1, 1];
        let std = var.add_scalar(self.epsilon).sqrt().reshape(shape);
        let x = (input - mean.reshape(shape)) / std;
        x * self.gamma.val().reshape(shape) + self.beta.val().reshape(shape)
    }
}
