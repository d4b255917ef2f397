//! Loss terms shared by the train and transfer procedures.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};
use models::NormStats;

/// Frobenius norm of a whole tensor, shape `[1]`.
fn l2<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, 1> {
    x.powf_scalar(2.0).sum().sqrt()
}

/// Sum over layers of `|running_mean - mean|_2 + |running_var - var|_2`.
pub fn bn_matching_loss<B: Backend>(stats: &[NormStats<B>], device: &B::Device) -> Tensor<B, 1> {
    stats.iter().fold(Tensor::zeros([1], device), |acc, s| {
        acc + l2(s.running_mean.clone() - s.mean.clone()) + l2(s.running_var.clone() - s.var.clone())
    })
}

/// Per-channel moments of `x` over (N, H, W): `(mean, unbiased var)`, each `[C]`.
pub fn channel_moments<B: Backend>(x: Tensor<B, 4>) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [n, c, h, w] = x.dims();
    let count = n * h * w;
    let flat = x.swap_dims(0, 1).reshape([c, count]);
    let mean = flat.clone().mean_dim(1);
    let ss = (flat - mean.clone()).powf_scalar(2.0).sum_dim(1);
    let var = ss.div_scalar(count.saturating_sub(1).max(1) as f64);
    (mean.reshape([c]), var.reshape([c]))
}

/// Pull the per-channel statistics of `x` towards zero mean and unit variance.
pub fn moment_penalty<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 1> {
    let (mean, var) = channel_moments(x);
    l2(mean) + l2(var.neg().add_scalar(1.0))
}

/// Norms of horizontal, vertical, and both diagonal neighbour differences.
pub fn total_variation<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 1> {
    let [n, c, h, w] = x.dims();
    let device = x.device();
    let mut tv = Tensor::zeros([1], &device);
    if w > 1 {
        tv = tv + l2(x.clone().slice([0..n, 0..c, 0..h, 0..w - 1]) - x.clone().slice([0..n, 0..c, 0..h, 1..w]));
    }
    if h > 1 {
        tv = tv + l2(x.clone().slice([0..n, 0..c, 0..h - 1, 0..w]) - x.clone().slice([0..n, 0..c, 1..h, 0..w]));
    }
    if h > 1 && w > 1 {
        tv = tv
            + l2(x.clone().slice([0..n, 0..c, 1..h, 0..w - 1])
                - x.clone().slice([0..n, 0..c, 0..h - 1, 1..w]));
        tv = tv
            + l2(x.clone().slice([0..n, 0..c, 0..h - 1, 0..w - 1])
                - x.slice([0..n, 0..c, 1..h, 1..w]));
    }
    tv
}

/// Fraction of rows whose argmax equals the target class.
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let n = targets.dims()[0];
    if n == 0 {
        return 0.0;
    }
    let hits = logits
        .argmax(1)
        .reshape([n])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<f64>();
    hits / n as f64
}

/// Read a single-element tensor as `f64`.
pub fn scalar<B: Backend>(x: Tensor<B, 1>) -> f64 {
    x.into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn accuracy_counts_argmax_hits() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::from_floats([[0.1, 0.9], [0.8, 0.2], [0.3, 0.7], [0.6, 0.4]], &device);
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![1i64, 0, 0, 1], [4]), &device);
        assert!(close(accuracy(logits, targets), 0.5));
    }

    #[test]
    fn total_variation_of_constant_image_is_zero() {
        let device = Default::default();
        let x = Tensor::<B, 4>::ones([2, 3, 5, 4], &device);
        assert!(close(scalar(total_variation(x)), 0.0));
    }

    #[test]
    fn total_variation_of_horizontal_step() {
        let device = Default::default();
        // one row [0, 1]: only the horizontal difference is non-zero
        let x = Tensor::<B, 4>::from_floats([[[[0.0, 1.0]]]], &device);
        assert!(close(scalar(total_variation(x)), 1.0));
    }

    #[test]
    fn moment_penalty_vanishes_for_standardized_channels() {
        let device = Default::default();
        // mean 0, unbiased var 1 over the four values
        let v = (3.0f32 / 4.0).sqrt();
        let x = Tensor::<B, 4>::from_floats([[[[v, -v], [v, -v]]]], &device);
        assert!(close(scalar(moment_penalty(x)), 0.0));
    }

    #[test]
    fn bn_loss_measures_distance_to_running_stats() {
        let device = Default::default();
        let stats = NormStats::<B> {
            mean: Tensor::from_floats([3.0, 0.0], &device),
            var: Tensor::from_floats([1.0, 1.0], &device),
            running_mean: Tensor::from_floats([0.0, 4.0], &device),
            running_var: Tensor::from_floats([1.0, 1.0], &device),
        };
        let loss = bn_matching_loss(&[stats.clone(), stats], &device);
        assert!(close(scalar(loss), 10.0));
        assert!(close(scalar(bn_matching_loss::<B>(&[], &device)), 0.0));
    }
}
