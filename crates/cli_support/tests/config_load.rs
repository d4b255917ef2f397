use std::fs;
use std::path::PathBuf;

use cli_support::{RootArgs, RunConfig};

#[test]
fn loads_minimal_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("normshift.toml");
    fs::write(&path, "data_root = \"/srv/datasets\"\n").expect("write config");

    let cfg = RunConfig::from_path(&path).expect("load config");
    assert_eq!(cfg.data_root, PathBuf::from("/srv/datasets"));
    assert_eq!(cfg.models_root, PathBuf::from("models"));
    assert_eq!(cfg.transfer_root, PathBuf::from("transfer"));
    assert_eq!(cfg.workers, 16);
}

#[test]
fn loader_section_and_cli_overrides() {
    let cfg = RunConfig::from_toml_str(
        "models_root = \"ckpts\"\n[loader]\nworkers = 4\n",
    )
    .expect("parse config");
    assert_eq!(cfg.models_root, PathBuf::from("ckpts"));
    assert_eq!(cfg.workers, 4);

    let args = RootArgs {
        data_root: Some(PathBuf::from("elsewhere")),
        workers: Some(2),
    };
    let cfg = cfg.with_overrides(&args);
    assert_eq!(cfg.data_root, PathBuf::from("elsewhere"));
    assert_eq!(cfg.workers, 2);
}

#[test]
fn missing_or_malformed_files_are_rejected() {
    assert!(RunConfig::from_path(std::path::Path::new("definitely/not/here.toml")).is_none());
    assert!(RunConfig::from_toml_str("workers = [").is_none());
}
