//! Catalog snapshot persistence.
//!
//! The full catalog is mirrored to a single JSON file. Mutations schedule a
//! debounced write: a later mutation within the window cancels and
//! reschedules, so bursts of updates coalesce into one disk write. Shutdown
//! flushes any pending write before exit.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{CoreError, CoreResult};
use crate::types::{RegistryEntry, ServerInfo};

/// On-disk snapshot format:
/// `{ tools: [...], servers: [...], metadata: { savedAt: epoch-ms } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub tools: Vec<RegistryEntry>,
    pub servers: Vec<ServerInfo>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Unix epoch milliseconds at write time.
    pub saved_at: i64,
}

impl RegistrySnapshot {
    pub fn new(tools: Vec<RegistryEntry>, servers: Vec<ServerInfo>) -> Self {
        Self {
            tools,
            servers,
            metadata: SnapshotMetadata {
                saved_at: chrono::Utc::now().timestamp_millis(),
            },
        }
    }
}

/// Load the snapshot if one exists; a missing file is a cold start, not an
/// error.
pub async fn load_snapshot(path: &Path) -> CoreResult<Option<RegistrySnapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(CoreError::Internal(format!(
                "failed to read snapshot {}: {error}",
                path.display()
            )))
        }
    };
    let snapshot = serde_json::from_slice(&bytes)
        .map_err(|error| CoreError::Internal(format!("snapshot parse error: {error}")))?;
    Ok(Some(snapshot))
}

pub async fn write_snapshot(path: &Path, snapshot: &RegistrySnapshot) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|error| {
            CoreError::Internal(format!(
                "failed to create snapshot directory {}: {error}",
                parent.display()
            ))
        })?;
    }
    let serialized = serde_json::to_vec_pretty(snapshot)
        .map_err(|error| CoreError::Internal(format!("snapshot serialize error: {error}")))?;
    tokio::fs::write(path, serialized).await.map_err(|error| {
        CoreError::Internal(format!(
            "failed to write snapshot {}: {error}",
            path.display()
        ))
    })
}

/// Debounced snapshot writer. At most one write is scheduled at a time;
/// rescheduling aborts the pending one and captures the newer snapshot.
pub struct SnapshotWriter {
    path: PathBuf,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    pub fn new(path: PathBuf, debounce: Duration) -> Self {
        Self {
            path,
            debounce,
            pending: Mutex::new(None),
        }
    }

    /// Schedule a write after the debounce window, replacing any pending one.
    pub fn schedule(&self, snapshot: RegistrySnapshot) {
        let path = self.path.clone();
        let debounce = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(error) = write_snapshot(&path, &snapshot).await {
                tracing::warn!("debounced snapshot write failed: {error}");
            }
        });
        let mut guard = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel any pending write and persist `snapshot` immediately.
    pub async fn flush(&self, snapshot: RegistrySnapshot) -> CoreResult<()> {
        let previous = {
            let mut guard = match self.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(handle) = previous {
            handle.abort();
        }
        write_snapshot(&self.path, &snapshot).await
    }
}
