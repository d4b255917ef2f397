//! Batch iteration over an `ImageSource`, producing burn tensors.

use crate::types::{DatasetError, DatasetResult, ImageSource};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::sync::Arc;

/// Images `[N, C, H, W]` and class indices `[N]`.
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Epoch-level loader: hands out a fresh `BatchIter` per epoch, reshuffling when enabled.
pub struct ImageLoader {
    source: Arc<dyn ImageSource>,
    batch_size: usize,
    rng: Option<rand::rngs::StdRng>,
    epoch: u64,
}

impl ImageLoader {
    /// `shuffle_seed: Some(seed)` shuffles every epoch from a seeded RNG; `None` keeps order.
    pub fn new(source: Arc<dyn ImageSource>, batch_size: usize, shuffle_seed: Option<u64>) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            rng: shuffle_seed.map(rand::rngs::StdRng::seed_from_u64),
            epoch: 0,
        }
    }

    /// Number of batches per epoch (last partial batch included).
    pub fn len(&self) -> usize {
        self.source.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> &Arc<dyn ImageSource> {
        &self.source
    }

    pub fn iter(&mut self) -> BatchIter {
        self.source.set_epoch(self.epoch);
        self.epoch += 1;
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        if let Some(rng) = self.rng.as_mut() {
            order.shuffle(rng);
        }
        BatchIter::from_order(self.source.clone(), order, self.batch_size)
    }
}

pub struct BatchIter {
    source: Arc<dyn ImageSource>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    images_buf: Vec<f32>,
    labels_buf: Vec<i64>,
}

impl BatchIter {
    /// Sequential iteration over the whole source.
    pub fn sequential(source: Arc<dyn ImageSource>, batch_size: usize) -> Self {
        let order = (0..source.len()).collect();
        Self::from_order(source, order, batch_size)
    }

    pub fn from_order(source: Arc<dyn ImageSource>, order: Vec<usize>, batch_size: usize) -> Self {
        Self {
            source,
            order,
            cursor: 0,
            batch_size: batch_size.max(1),
            images_buf: Vec::new(),
            labels_buf: Vec::new(),
        }
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ImageBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let source = &self.source;
        let loaded = slice
            .par_iter()
            .map(|idx| source.get(*idx))
            .collect::<Vec<_>>();

        self.images_buf.clear();
        self.labels_buf.clear();
        let mut expected: Option<[usize; 3]> = None;
        for item in loaded {
            let item = item?;
            let shape = item.shape();
            match expected {
                None => expected = Some(shape),
                Some(exp) if exp != shape => {
                    return Err(DatasetError::ShapeMismatch {
                        expected: exp,
                        found: shape,
                    });
                }
                _ => {}
            }
            self.images_buf.extend_from_slice(&item.image_chw);
            self.labels_buf.push(item.label as i64);
        }

        let Some([c, h, w]) = expected else {
            return Ok(None);
        };
        let n = self.labels_buf.len();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(self.images_buf.clone(), [n, c, h, w]),
            device,
        );
        let labels =
            Tensor::<B, 1, Int>::from_data(TensorData::new(self.labels_buf.clone(), [n]), device);
        Ok(Some(ImageBatch { images, labels }))
    }
}
