//! Core types and error definitions for image_dataset.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unknown dataset '{0}' (expected one of CIFAR10, CIFAR10Distorted, MNIST, PBCBarcelona, Shapes)")]
    UnknownDataset(String),
    #[error("dataset folder {path} has no class directories")]
    NoClasses { path: PathBuf },
    #[error("index {index} out of range for source of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("batch contains varying image shapes: {found:?} vs {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        found: [usize; 3],
    },
}

/// One decoded sample: CHW floats in `[0, 1]` plus its class index.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image_chw: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub label: usize,
}

impl ImageItem {
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

/// Random-access collection of labelled images.
pub trait ImageSource: Send + Sync {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> DatasetResult<ImageItem>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Epoch about to be read; sources with seeded augmentation draw from it.
    fn set_epoch(&self, _epoch: u64) {}
}

/// A view over a subset of another source's indices.
pub struct Subset {
    inner: Arc<dyn ImageSource>,
    indices: Vec<usize>,
}

impl Subset {
    /// The first `range` items of `inner`, clamped to its length.
    pub fn range(inner: Arc<dyn ImageSource>, range: Range<usize>) -> Self {
        let len = inner.len();
        let start = range.start.min(len);
        let end = range.end.min(len).max(start);
        Self {
            inner,
            indices: (start..end).collect(),
        }
    }

    pub fn full(inner: Arc<dyn ImageSource>) -> Self {
        let len = inner.len();
        Self::range(inner, 0..len)
    }

    pub fn from_indices(inner: Arc<dyn ImageSource>, indices: Vec<usize>) -> Self {
        let len = inner.len();
        let indices = indices.into_iter().filter(|i| *i < len).collect();
        Self { inner, indices }
    }
}

impl ImageSource for Subset {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, index: usize) -> DatasetResult<ImageItem> {
        let inner_idx = *self.indices.get(index).ok_or(DatasetError::OutOfRange {
            index,
            len: self.indices.len(),
        })?;
        self.inner.get(inner_idx)
    }

    fn set_epoch(&self, epoch: u64) {
        self.inner.set_epoch(epoch);
    }
}

/// Named datasets understood by `get_dataset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    Cifar10,
    Cifar10Distorted,
    Mnist,
    PbcBarcelona,
    Shapes,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 5] = [
        DatasetKind::Cifar10,
        DatasetKind::Cifar10Distorted,
        DatasetKind::Mnist,
        DatasetKind::PbcBarcelona,
        DatasetKind::Shapes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Cifar10 => "CIFAR10",
            DatasetKind::Cifar10Distorted => "CIFAR10Distorted",
            DatasetKind::Mnist => "MNIST",
            DatasetKind::PbcBarcelona => "PBCBarcelona",
            DatasetKind::Shapes => "Shapes",
        }
    }

    /// Directory under the data root holding the image folders.
    pub fn folder(&self) -> &'static str {
        match self {
            DatasetKind::Cifar10 | DatasetKind::Cifar10Distorted => "CIFAR10",
            DatasetKind::Mnist => "MNIST",
            DatasetKind::PbcBarcelona => "PBCBarcelona",
            DatasetKind::Shapes => "Shapes",
        }
    }

    /// Model input shape as (C, H, W).
    pub fn input_shape(&self) -> [usize; 3] {
        match self {
            DatasetKind::Cifar10 | DatasetKind::Cifar10Distorted => [3, 32, 32],
            DatasetKind::Mnist => [1, 28, 28],
            DatasetKind::PbcBarcelona => [3, 64, 64],
            DatasetKind::Shapes => [3, 32, 32],
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        DatasetKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| DatasetError::UnknownDataset(s.to_string()))
    }
}
