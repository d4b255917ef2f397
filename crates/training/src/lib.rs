#![recursion_limit = "256"]

pub mod checkpoint;
pub mod eval;
pub mod grid;
pub mod losses;
pub mod metrics;
pub mod plot;
pub mod runlog;
pub mod train;
pub mod transfer;

pub use checkpoint::{CheckpointError, CheckpointState};
pub use metrics::{linspace, smooth, MetricLog};
pub use runlog::RunLog;
pub use train::{run_train, TrainArgs};
pub use transfer::{run_transfer, TransferArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

/// Autodiff wrapper used by both procedures.
pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
