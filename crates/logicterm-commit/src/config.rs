//! Commit engine configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a [`CommitEngine`](crate::CommitEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Directory holding `commit-manager.data`, `stamp-alias.map` and
    /// `stamp-comment.map`.
    pub data_dir: PathBuf,
    /// Capacity of the write-permit pool (bound on in-flight writes).
    pub write_permits: usize,
    /// Concurrently executing writes per write-completion service.
    pub writer_threads: usize,
    /// Write the state files when the engine shuts down.
    pub persist_on_shutdown: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./commit-state"),
            write_permits: 40,
            writer_threads: 2,
            persist_on_shutdown: true,
        }
    }
}

impl CommitConfig {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commit.json");
        std::fs::write(&path, r#"{"data_dir": "/var/lib/terms", "write_permits": 8}"#).unwrap();

        let config = CommitConfig::from_json_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/terms"));
        assert_eq!(config.write_permits, 8);
        assert_eq!(config.writer_threads, 2);
        assert!(config.persist_on_shutdown);
    }

    #[test]
    fn rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commit.json");
        std::fs::write(&path, "{ write_permits: ").unwrap();
        assert!(matches!(
            CommitConfig::from_json_file(&path),
            Err(crate::CommitError::Config(_))
        ));
    }
}
