//! Shared plumbing for the `train` and `transfer` binaries: backend selection,
//! the optional `normshift.toml` config layer, and logging/worker setup.

pub mod common;
pub mod config;

pub use common::{init_tracing, init_workers, validate_backend_choice, BackendKind, RootArgs};
pub use config::RunConfig;
