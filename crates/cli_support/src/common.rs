use clap::{Args, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::NdArray => write!(f, "nd-array"),
            BackendKind::Wgpu => write!(f, "wgpu"),
        }
    }
}

/// Location overrides shared by both binaries; unset fields fall back to the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct RootArgs {
    /// Dataset root containing one folder per dataset (overrides normshift.toml).
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    /// Number of image decoding threads (overrides normshift.toml).
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Check that the requested backend matches what this binary was compiled with.
pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!(
                "backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose nd-array backend"
            )
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!(
                "built with backend-wgpu; the WGPU backend is used despite --backend nd-array"
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Size the global rayon pool used for image decoding.
pub fn init_workers(workers: usize) {
    let workers = workers.max(1);
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
    {
        tracing::debug!("rayon pool already initialised ({e}); keeping existing pool");
    }
}
