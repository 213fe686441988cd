//! Data directory layout.
//!
//! Resolved once at startup from: CLI `--data-dir` > `SSHDECK_DATA_DIR` env > `~/.sshdeck`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sshdeck_protocol::new_id;

const DATA_DIR_ENV: &str = "SSHDECK_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let root = if let Some(p) = explicit {
            p.to_path_buf()
        } else if let Ok(env_val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(env_val)
        } else {
            dirs::home_dir()
                .context("HOME directory not found; pass --data-dir")?
                .join(".sshdeck")
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn workspace_id_path(&self) -> PathBuf {
        self.root.join("workspace-id")
    }

    /// Create all required subdirectories under the data dir.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }

    /// Stable id for this install, so the backend sees the same workspace
    /// across restarts.
    pub fn load_or_create_workspace_id(&self) -> anyhow::Result<String> {
        let path = self.workspace_id_path();
        if let Ok(existing) = std::fs::read_to_string(&path) {
            let existing = existing.trim();
            if !existing.is_empty() {
                return Ok(existing.to_string());
            }
        }
        let id = new_id();
        std::fs::write(&path, &id)
            .with_context(|| format!("write workspace id to {}", path.display()))?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::resolve(Some(dir.path())).unwrap();
        assert_eq!(paths.root(), dir.path());
        assert_eq!(paths.log_dir(), dir.path().join("logs"));
    }

    #[test]
    fn workspace_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::resolve(Some(dir.path())).unwrap();
        paths.ensure_dirs().unwrap();

        let first = paths.load_or_create_workspace_id().unwrap();
        let second = paths.load_or_create_workspace_id().unwrap();
        assert_eq!(first, second);
        assert!(paths.log_dir().is_dir());
    }
}
