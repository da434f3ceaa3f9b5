// # File Checkpoint Store
//
// File-based implementation of CheckpointStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Automatic backup: the previous file is kept as `.backup`
// - Corruption detection: JSON validation on load
// - Recovery: falls back to the backup, then to "no checkpoint"
//
// Falling back to "no checkpoint" means the next run starts live and skips
// the catch-up. Falling back to the backup replays a little more history
// than strictly needed.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "last_processed_event": "2025-01-09T12:00:00Z",
//   "saved_at": "2025-01-09T12:00:03Z"
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::CheckpointStore;

/// Checkpoint file format version
const CHECKPOINT_FILE_VERSION: &str = "1.0";

/// File-based checkpoint store
///
/// # Example
///
/// ```rust,no_run
/// use bond_core::state::FileCheckpointStore;
/// use bond_core::traits::CheckpointStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileCheckpointStore::new("/var/lib/bond/checkpoint.json").await?;
///     let resume_from = store.load().await?;
///     println!("resuming after {:?}", resume_from);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    value: Option<DateTime<Utc>>,
    dirty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFileFormat {
    version: String,
    last_processed_event: Option<DateTime<Utc>>,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
}

enum LoadError {
    Corrupt(String),
    Io(Error),
}

impl FileCheckpointStore {
    /// Create or load a file checkpoint store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file
    /// 3. If it is corrupted, load the backup and restore it
    /// 4. If both fail, start with no checkpoint
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create checkpoint directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let value = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                value,
                dirty: false,
            })),
        })
    }

    /// Path of the checkpoint file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_with_recovery(path: &Path) -> Result<Option<DateTime<Utc>>, Error> {
        match Self::load_file(path).await {
            Ok(value) => {
                tracing::debug!("Loaded checkpoint from {}: {:?}", path.display(), value);
                Ok(value)
            }
            Err(LoadError::Io(e)) => Err(e),
            Err(LoadError::Corrupt(reason)) => {
                tracing::warn!(
                    "Checkpoint file appears corrupted: {}. Attempting recovery from backup.",
                    reason
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting without a checkpoint.");
                    return Ok(None);
                }

                match Self::load_file(&backup_path).await {
                    Ok(value) => {
                        tracing::info!("Recovered checkpoint from backup: {:?}", value);
                        if let Err(e) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore checkpoint file from backup: {}",
                                e
                            );
                        }
                        Ok(value)
                    }
                    Err(_) => {
                        tracing::error!("Backup also unreadable. Starting without a checkpoint.");
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn load_file(path: &Path) -> Result<Option<DateTime<Utc>>, LoadError> {
        if !path.exists() {
            tracing::debug!("Checkpoint file does not exist: {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::state_store(format!(
                "Failed to read checkpoint file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: CheckpointFileFormat = serde_json::from_str(&content)
            .map_err(|e| LoadError::Corrupt(format!("{}: {}", path.display(), e)))?;

        if file.version != CHECKPOINT_FILE_VERSION {
            tracing::warn!(
                "Checkpoint file version mismatch: expected {}, got {}. Attempting to load anyway.",
                CHECKPOINT_FILE_VERSION,
                file.version
            );
        }

        Ok(file.last_processed_event)
    }

    async fn write_file(&self) -> Result<(), Error> {
        let value = self.state.read().await.value;
        let file = CheckpointFileFormat {
            version: CHECKPOINT_FILE_VERSION.to_string(),
            last_processed_event: value,
            saved_at: Some(Utc::now()),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::state_store(format!("Failed to serialize checkpoint: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.flush().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create checkpoint backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        self.state.write().await.dirty = false;
        tracing::trace!("Checkpoint written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, Error> {
        Ok(self.state.read().await.value)
    }

    async fn save(&self, ts: DateTime<Utc>) -> Result<(), Error> {
        {
            let mut state = self.state.write().await;
            if state.value.is_some_and(|current| current >= ts) {
                return Ok(());
            }
            state.value = Some(ts);
            state.dirty = true;
        }
        self.write_file().await
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write_file().await } else { Ok(()) }
    }
}
