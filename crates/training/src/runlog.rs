use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Progress lines for one run: emitted through `tracing` and appended to a text file.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a stale log left by a previous run.
    pub fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub fn line(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::info!("{msg}");
        if let Err(e) = self.append(msg) {
            tracing::warn!("could not append to {}: {e}", self.path.display());
        }
    }

    fn append(&self, msg: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{msg}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_accumulate_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path().join("nested").join("log.txt"));
        log.line("first");
        log.line(format!("second {}", 2));
        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "first\nsecond 2\n");
        log.clear().unwrap();
        assert!(!log.path().exists());
        log.clear().unwrap();
    }
}
