use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::playback::PlaybackSnapshot;
use crate::protocol::PlayableMedia;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the zone keeps across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub playback: PlaybackSnapshot,
    #[serde(default, rename = "mediaCache")]
    pub media_cache: HashMap<String, PlayableMedia>,
}

/// The durable-storage boundary. The core never sees the format; it hands
/// over a snapshot on every transition and on the save interval, and reads
/// one back at startup.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedState>, StorageError>;
    async fn save(&self, state: &PersistedState) -> Result<(), StorageError>;
}

/// Snapshot file on disk, pretty JSON. The parent directory is created on
/// first save.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn load(&self) -> Result<Option<PersistedState>, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

/// Keeps the snapshot in memory only; ephemeral zones and tests.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self) -> Result<Option<PersistedState>, StorageError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StorageError> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}
