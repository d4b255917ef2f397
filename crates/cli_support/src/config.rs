use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::RootArgs;

const DEFAULT_CONFIG_NAME: &str = "normshift.toml";
const CONFIG_ENV: &str = "NORMSHIFT_CONFIG";
const DATA_ROOT_ENV: &str = "NORMSHIFT_DATA_ROOT";
const DEFAULT_WORKERS: usize = 16;

/// Filesystem layout and loader sizing for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub data_root: PathBuf,
    pub models_root: PathBuf,
    pub transfer_root: PathBuf,
    pub workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            models_root: PathBuf::from("models"),
            transfer_root: PathBuf::from("transfer"),
            workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    data_root: Option<String>,
    models_root: Option<String>,
    transfer_root: Option<String>,
    loader: Option<LoaderSection>,
}

#[derive(Debug, Deserialize, Default)]
struct LoaderSection {
    workers: Option<usize>,
}

impl RunConfig {
    /// Load `$NORMSHIFT_CONFIG` or `./normshift.toml`, falling back to defaults.
    pub fn load() -> Self {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_path(Path::new(&path)).unwrap_or_else(|| {
                tracing::warn!("config {path} from ${CONFIG_ENV} is missing or invalid; using defaults");
                Self::default()
            }),
            Err(_) => Self::from_path(Path::new(DEFAULT_CONFIG_NAME)).unwrap_or_default(),
        };
        if let Ok(root) = std::env::var(DATA_ROOT_ENV) {
            if !root.trim().is_empty() {
                cfg.data_root = expand_path(&root);
            }
        }
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Option<Self> {
        let file: RunConfigFile = toml::from_str(raw).ok()?;
        Some(Self::from_file(file))
    }

    fn from_file(file: RunConfigFile) -> Self {
        let defaults = Self::default();
        RunConfig {
            data_root: file
                .data_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.data_root),
            models_root: file
                .models_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.models_root),
            transfer_root: file
                .transfer_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.transfer_root),
            workers: file
                .loader
                .and_then(|l| l.workers)
                .unwrap_or(defaults.workers),
        }
    }

    /// Apply command-line overrides on top of the file/env values.
    pub fn with_overrides(mut self, args: &RootArgs) -> Self {
        if let Some(root) = &args.data_root {
            self.data_root = root.clone();
        }
        if let Some(workers) = args.workers {
            self.workers = workers;
        }
        self
    }

    fn warn_if_invalid(&self) {
        if self.workers == 0 {
            tracing::warn!("config: loader.workers is 0; decoding will use a single thread");
        }
        if !self.data_root.exists() {
            tracing::debug!(
                "config: data_root {} does not exist; only generated datasets are available",
                self.data_root.display()
            );
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
