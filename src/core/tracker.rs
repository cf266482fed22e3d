//! Execution tracker: persisted run records, used for observability,
//! retention and resuming runs interrupted by a crash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::execution::{ExecutionRun, RunStatus};

/// Persisted form of a run.
pub type ExecutionRecord = ExecutionRun;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Execution record corrupted: {0}")]
    Corrupted(String),
}

#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Insert or replace the record for `run.id`.
    async fn save(&self, run: &ExecutionRecord) -> Result<(), TrackerError>;
    async fn load(&self, run_id: &str) -> Result<Option<ExecutionRecord>, TrackerError>;
    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<ExecutionRecord>, TrackerError>;
    async fn list_by_session(&self, session_id: &str)
        -> Result<Vec<ExecutionRecord>, TrackerError>;
    async fn delete(&self, run_id: &str) -> Result<(), TrackerError>;

    /// Drop terminal records completed before `cutoff`; returns the count.
    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackerError>;
}

fn expired(run: &ExecutionRecord, cutoff: DateTime<Utc>) -> bool {
    run.is_terminal() && run.completed_at.is_some_and(|t| t < cutoff)
}

fn by_start_time(mut runs: Vec<ExecutionRecord>) -> Vec<ExecutionRecord> {
    runs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
    runs
}

#[derive(Default)]
pub struct MemoryTrackerStore {
    data: tokio::sync::RwLock<HashMap<String, ExecutionRecord>>,
}

impl MemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackerStore for MemoryTrackerStore {
    async fn save(&self, run: &ExecutionRecord) -> Result<(), TrackerError> {
        self.data.write().await.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<ExecutionRecord>, TrackerError> {
        Ok(self.data.read().await.get(run_id).cloned())
    }

    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<ExecutionRecord>, TrackerError> {
        let data = self.data.read().await;
        Ok(by_start_time(
            data.values().filter(|r| r.status == status).cloned().collect(),
        ))
    }

    async fn list_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ExecutionRecord>, TrackerError> {
        let data = self.data.read().await;
        Ok(by_start_time(
            data.values()
                .filter(|r| r.session_id == session_id)
                .cloned()
                .collect(),
        ))
    }

    async fn delete(&self, run_id: &str) -> Result<(), TrackerError> {
        self.data.write().await.remove(run_id);
        Ok(())
    }

    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackerError> {
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, run| !expired(run, cutoff));
        Ok(before - data.len())
    }
}

/// One JSON file per run under `dir`.
pub struct FileTrackerStore {
    dir: PathBuf,
}

impl FileTrackerStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| TrackerError::StorageError(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.run.json", run_id))
    }

    async fn read_path(path: &Path) -> Result<Option<ExecutionRecord>, TrackerError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrackerError::StorageError(e.to_string())),
        };
        let run = serde_json::from_slice::<ExecutionRecord>(&bytes)
            .map_err(|e| TrackerError::Corrupted(format!("{}: {}", path.display(), e)))?;
        Ok(Some(run))
    }

    async fn load_all(&self) -> Result<Vec<ExecutionRecord>, TrackerError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| TrackerError::StorageError(e.to_string()))?;
        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TrackerError::StorageError(e.to_string()))?
        {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".run.json"));
            if !is_record {
                continue;
            }
            if let Some(run) = Self::read_path(&path).await? {
                runs.push(run);
            }
        }
        Ok(runs)
    }
}

#[async_trait]
impl TrackerStore for FileTrackerStore {
    async fn save(&self, run: &ExecutionRecord) -> Result<(), TrackerError> {
        let path = self.path_for(&run.id);
        let bytes = serde_json::to_vec_pretty(run)
            .map_err(|e| TrackerError::SerializationError(e.to_string()))?;
        // Written beside the target, then renamed over it.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| TrackerError::StorageError(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| TrackerError::StorageError(e.to_string()))
    }

    async fn load(&self, run_id: &str) -> Result<Option<ExecutionRecord>, TrackerError> {
        Self::read_path(&self.path_for(run_id)).await
    }

    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<ExecutionRecord>, TrackerError> {
        let runs = self.load_all().await?;
        Ok(by_start_time(
            runs.into_iter().filter(|r| r.status == status).collect(),
        ))
    }

    async fn list_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ExecutionRecord>, TrackerError> {
        let runs = self.load_all().await?;
        Ok(by_start_time(
            runs.into_iter()
                .filter(|r| r.session_id == session_id)
                .collect(),
        ))
    }

    async fn delete(&self, run_id: &str) -> Result<(), TrackerError> {
        let _ = tokio::fs::remove_file(self.path_for(run_id)).await;
        Ok(())
    }

    async fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackerError> {
        let mut purged = 0;
        for run in self.load_all().await? {
            if expired(&run, cutoff) {
                self.delete(&run.id).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}
