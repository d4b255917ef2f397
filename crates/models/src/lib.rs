//! Burn models for classifier training and batch-norm statistic transfer.
//!
//! - `ResNet`: classifier family (`resnet18`, `resnet34`, `resnet8`, `simplecnn`)
//!   whose forward pass can return the statistics of every norm layer.
//! - `TransferNet`: U-Net / U-Net++ / plain conv image-to-image networks that
//!   are trained in front of a frozen classifier.
//!
//! Norm layers take an explicit `NormMode`, so a frozen classifier keeps using
//! its running statistics even on an autodiff backend.

pub mod blocks;
pub mod classifier;
pub mod norm;
pub mod transfer;

pub use classifier::{get_model, network_config, ClassifierOutput, ResNet, ResNetConfig, NETWORKS};
pub use norm::{NormMode, NormStats, StatBatchNorm};
pub use transfer::{
    decoder_nodes, get_transfer_model, TransferKind, TransferNet, TransferNetConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown network '{name}' (expected one of: {expected})")]
    UnknownNetwork { name: String, expected: String },
    #[error("unknown transfer network '{name}' (expected one of: {expected})")]
    UnknownTransfer { name: String, expected: String },
    #[error("invalid model config: {0}")]
    InvalidConfig(String),
}
