//! Durable key-value persistence for checkpoint records.
//!
//! `FileStore` keeps one self-describing JSON record per run and writes it
//! with a write-to-temp-then-rename discipline so a reader never observes
//! a partially written record. `MemoryStore` implements the same contract
//! for tests.

use crate::checkpoint::model::RunCheckpoint;
use crate::errors::CheckpointError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Storage contract for checkpoint records, addressed by run id.
///
/// Writes must be atomic with respect to readers. An unreachable medium
/// surfaces as `StorageUnavailable`, never as silent success.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError>;
    async fn put(&self, checkpoint: &RunCheckpoint) -> Result<(), CheckpointError>;
    async fn delete(&self, run_id: &str) -> Result<(), CheckpointError>;
    async fn exists(&self, run_id: &str) -> Result<bool, CheckpointError>;
}

/// File-backed store: `<dir>/<run_id>.json`, one record per run.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: &Path) -> Result<Self, CheckpointError> {
        std::fs::create_dir_all(dir)
            .map_err(|source| CheckpointError::StorageUnavailable { source })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, run_id: &str) -> PathBuf {
        // Run ids are caller-supplied strings; keep the filename flat.
        let safe: String = run_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn get(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError> {
        let path = self.record_path(run_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::StorageUnavailable { source }),
        };
        let checkpoint =
            serde_json::from_str(&raw).map_err(|source| CheckpointError::Corrupt {
                run_id: run_id.to_string(),
                source,
            })?;
        Ok(Some(checkpoint))
    }

    async fn put(&self, checkpoint: &RunCheckpoint) -> Result<(), CheckpointError> {
        let path = self.record_path(&checkpoint.run_id);
        let temp_path = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CheckpointError::StorageUnavailable {
                source: std::io::Error::other(e),
            })?;

        // Write to temp then rename so readers only ever see whole records.
        tokio::fs::write(&temp_path, &raw)
            .await
            .map_err(|source| CheckpointError::StorageUnavailable { source })?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|source| CheckpointError::StorageUnavailable { source })?;

        debug!(run_id = %checkpoint.run_id, path = %path.display(), "Checkpoint persisted");
        Ok(())
    }

    async fn delete(&self, run_id: &str) -> Result<(), CheckpointError> {
        let path = self.record_path(run_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::StorageUnavailable { source }),
        }
    }

    async fn exists(&self, run_id: &str) -> Result<bool, CheckpointError> {
        tokio::fs::try_exists(self.record_path(run_id))
            .await
            .map_err(|source| CheckpointError::StorageUnavailable { source })
    }
}

/// In-memory store for tests and dry runs; same contract as `FileStore`.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, RunCheckpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, run_id: &str) -> Result<Option<RunCheckpoint>, CheckpointError> {
        Ok(self.records.lock().unwrap().get(run_id).cloned())
    }

    async fn put(&self, checkpoint: &RunCheckpoint) -> Result<(), CheckpointError> {
        self.records
            .lock()
            .unwrap()
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.records.lock().unwrap().remove(run_id);
        Ok(())
    }

    async fn exists(&self, run_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.records.lock().unwrap().contains_key(run_id))
    }
}
