//! Checkpoint directories: `model.bin`, `optim.bin`, and `state.json`.
//!
//! The recorder sets the `.bin` extension itself, so records are written
//! under extension-less stems inside the checkpoint directory.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::metrics::MetricLog;

const MODEL_STEM: &str = "model";
const OPTIM_STEM: &str = "optim";
const STATE_FILE: &str = "state.json";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("no checkpoint at {0}")]
    Missing(PathBuf),
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid checkpoint state {path}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("recorder failed for {path}: {message}")]
    Record { path: PathBuf, message: String },
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Training progress saved next to the weights.
///
/// `config` is whatever is needed to rebuild the module before its record is
/// loaded (`ResNetConfig` or `TransferNetConfig`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState<C> {
    pub epoch: usize,
    pub acc: f64,
    pub logs: MetricLog,
    #[serde(default)]
    pub input_shape: Option<[usize; 3]>,
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    pub config: C,
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

fn record_error(path: &Path, err: impl std::fmt::Debug) -> CheckpointError {
    CheckpointError::Record {
        path: path.to_path_buf(),
        message: format!("{err:?}"),
    }
}

/// True when `dir` holds a saved state file.
pub fn exists(dir: &Path) -> bool {
    dir.join(STATE_FILE).is_file()
}

pub fn save<B, M, O, C>(
    dir: &Path,
    model: &M,
    optim: &O,
    state: &CheckpointState<C>,
) -> CheckpointResult<()>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
    C: Serialize,
{
    fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let recorder = recorder();
    let model_path = dir.join(MODEL_STEM);
    model
        .clone()
        .save_file(model_path.clone(), &recorder)
        .map_err(|e| record_error(&model_path, e))?;

    let optim_path = dir.join(OPTIM_STEM);
    Recorder::<B>::record(&recorder, optim.to_record(), optim_path.clone())
        .map_err(|e| record_error(&optim_path, e))?;

    let state_path = dir.join(STATE_FILE);
    let json = serde_json::to_vec_pretty(state).map_err(|source| CheckpointError::State {
        path: state_path.clone(),
        source,
    })?;
    fs::write(&state_path, json).map_err(|source| CheckpointError::Io {
        path: state_path,
        source,
    })
}

pub fn load_state<C: DeserializeOwned>(dir: &Path) -> CheckpointResult<CheckpointState<C>> {
    let path = dir.join(STATE_FILE);
    if !path.is_file() {
        return Err(CheckpointError::Missing(dir.to_path_buf()));
    }
    let bytes = fs::read(&path).map_err(|source| CheckpointError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CheckpointError::State { path, source })
}

/// Load saved weights into `model`, which must already have the saved architecture.
pub fn load_model<B: Backend, M: Module<B>>(
    dir: &Path,
    model: M,
    device: &B::Device,
) -> CheckpointResult<M> {
    let path = dir.join(MODEL_STEM);
    model
        .load_file(path.clone(), &recorder(), device)
        .map_err(|e| record_error(&path, e))
}

pub fn load_optimizer<B, M, O>(dir: &Path, optim: O, device: &B::Device) -> CheckpointResult<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let path = dir.join(OPTIM_STEM);
    let record = Recorder::<B>::load(&recorder(), path.clone(), device)
        .map_err(|e| record_error(&path, e))?;
    Ok(optim.load_record(record))
}
