//! Configuration types for Vellum

use crate::error::{SnapshotError, SnapshotResult};
use crate::types::{ChunkLimits, IDEAL_CHUNK_SIZE, MAX_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where finished snapshots are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMethod {
    /// Snapshots live only as in-memory tree versions
    Memory,
    /// Snapshots are also persisted to a sled database under `data_dir`
    Sled,
}

/// Snapshot engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Number of tree versions kept in memory
    pub keep_recent: usize,

    /// Rejections tolerated before giving up on state sync
    pub retry_limit: u32,

    /// Take a snapshot every N blocks
    pub interval: u64,

    /// Maximum concurrent state provider calls
    pub workers: usize,

    /// Storage backend for finished snapshots
    pub storage: StorageMethod,

    /// Data directory for the sled backend
    pub data_dir: PathBuf,

    /// Hard cap per chunk in bytes
    pub max_chunk_size: usize,

    /// Target chunk size in bytes
    pub ideal_chunk_size: usize,

    /// Logging level
    pub log_level: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            keep_recent: 10,
            retry_limit: 5,
            interval: 1,
            workers: 64,
            storage: StorageMethod::Memory,
            data_dir: PathBuf::from("./data"),
            max_chunk_size: MAX_CHUNK_SIZE,
            ideal_chunk_size: IDEAL_CHUNK_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl SnapshotConfig {
    /// Config suitable for tests: in-memory, small retry budget
    pub fn for_tests() -> Self {
        Self {
            keep_recent: 3,
            retry_limit: 2,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SnapshotResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: SnapshotConfig = serde_json::from_str(&content)
            .map_err(|e| SnapshotError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> SnapshotResult<()> {
        if self.ideal_chunk_size == 0 {
            return Err(SnapshotError::Config("ideal_chunk_size must be positive".into()));
        }
        if self.ideal_chunk_size > self.max_chunk_size {
            return Err(SnapshotError::Config(format!(
                "ideal_chunk_size {} exceeds max_chunk_size {}",
                self.ideal_chunk_size, self.max_chunk_size
            )));
        }
        if self.workers == 0 {
            return Err(SnapshotError::Config("workers must be positive".into()));
        }
        if self.interval == 0 {
            return Err(SnapshotError::Config("interval must be positive".into()));
        }
        Ok(())
    }

    /// Number of versions to keep, never less than one
    pub fn keep_recent(&self) -> usize {
        self.keep_recent.max(1)
    }

    pub fn chunk_limits(&self) -> ChunkLimits {
        ChunkLimits::new(self.max_chunk_size, self.ideal_chunk_size)
    }

    /// Location of the sled snapshot database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("snapshot.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SnapshotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_limits(), ChunkLimits::default());
    }

    #[test]
    fn test_invalid_chunk_sizes() {
        let config = SnapshotConfig {
            ideal_chunk_size: 20,
            max_chunk_size: 10,
            ..SnapshotConfig::default()
        };
        assert!(matches!(config.validate(), Err(SnapshotError::Config(_))));
    }

    #[test]
    fn test_keep_recent_clamped() {
        let config = SnapshotConfig {
            keep_recent: 0,
            ..SnapshotConfig::default()
        };
        assert_eq!(config.keep_recent(), 1);
    }

    #[test]
    fn test_config_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("snapshot.json");
        std::fs::write(&path, r#"{"retry_limit": 9, "storage": "sled"}"#).unwrap();

        let config = SnapshotConfig::from_file(&path).unwrap();
        assert_eq!(config.retry_limit, 9);
        assert_eq!(config.storage, StorageMethod::Sled);
        assert_eq!(config.keep_recent, 10);
    }
}
