use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use image_dataset::{BatchIter, ChannelAdapter};

use crate::losses::accuracy;

/// Accuracy of `forward` over every batch of `batches`, weighted by sample count.
///
/// `transform` adapts the input channels before the forward pass. When `name`
/// is set the result is logged as `<name> accuracy: <acc>`. An empty iterator
/// scores 0.
pub fn test_accuracy<B, F>(
    mut forward: F,
    mut batches: BatchIter,
    transform: Option<ChannelAdapter<B>>,
    name: Option<&str>,
    device: &B::Device,
) -> anyhow::Result<f64>
where
    B: Backend,
    F: FnMut(Tensor<B, 4>) -> Tensor<B, 2>,
{
    let mut hits = 0.0;
    let mut total = 0usize;
    while let Some(batch) = batches.next_batch::<B>(device)? {
        let n = batch.len();
        let images = match transform {
            Some(adapt) => adapt(batch.images),
            None => batch.images,
        };
        hits += accuracy(forward(images), batch.labels) * n as f64;
        total += n;
    }
    let acc = if total == 0 { 0.0 } else { hits / total as f64 };
    if let Some(name) = name {
        tracing::info!("{name} accuracy: {acc:.3}");
    }
    Ok(acc)
}
