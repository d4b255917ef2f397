//! Dataset loading and batching for the classifier/transfer pipelines.
//!
//! This crate provides:
//! - A registry of named classification datasets laid out as image folders
//! - A generated `Shapes` dataset for runs without data on disk
//! - Subsets, light augmentation, and a fixed input distortion
//! - Burn-compatible batch iteration with parallel decoding

pub mod aug;
pub mod batch;
pub mod channels;
pub mod folder;
pub mod registry;
pub mod shapes;
pub mod types;

pub use aug::{Augment, Distortion};
pub use batch::{BatchIter, ImageBatch, ImageLoader};
pub use channels::{adapt_channels, grayscale_to_rgb, rgb_to_grayscale, ChannelAdapter};
pub use folder::ImageFolder;
pub use registry::{get_dataset, ClassificationDataset};
pub use shapes::ShapesSource;
pub use types::*;
