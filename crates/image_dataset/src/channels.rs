//! Channel-count adapters between grayscale and RGB image batches.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

pub type ChannelAdapter<B> = fn(Tensor<B, 4>) -> Tensor<B, 4>;

const LUMA_R: f32 = 0.2989;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// `[N, 1, H, W] -> [N, 3, H, W]` by repeating the single channel.
pub fn grayscale_to_rgb<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    Tensor::cat(vec![x.clone(), x.clone(), x], 1)
}

/// `[N, 3, H, W] -> [N, 1, H, W]` using ITU-R 601 luma weights.
pub fn rgb_to_grayscale<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [n, _, h, w] = x.dims();
    let r = x.clone().slice([0..n, 0..1, 0..h, 0..w]);
    let g = x.clone().slice([0..n, 1..2, 0..h, 0..w]);
    let b = x.slice([0..n, 2..3, 0..h, 0..w]);
    r.mul_scalar(LUMA_R) + g.mul_scalar(LUMA_G) + b.mul_scalar(LUMA_B)
}

/// Pick the adapter mapping `from` channels to `to` channels, if one is needed.
pub fn adapt_channels<B: Backend>(from: usize, to: usize) -> Option<ChannelAdapter<B>> {
    match (from, to) {
        (1, 3) => Some(grayscale_to_rgb::<B> as ChannelAdapter<B>),
        (3, 1) => Some(rgb_to_grayscale::<B> as ChannelAdapter<B>),
        _ => None,
    }
}
