//! Backup and restore results
//!
//! Polling plugins report what their backends did with backups and
//! restores. Reports are queued as [`ResultBatch`]es, one per VM, and
//! written into the VM's metadata document by a single worker:
//!
//! ```text
//! ResultsSource ──poll──▶ ResultQueue ──▶ ResultsWriter ──▶ metadata PUT
//!  (one task each)        (unbounded)     (one task)
//! ```

mod aggregator;
mod idempotence;
mod updater;

pub use aggregator::{BatchOutcome, ResultsHandler, ResultsWriter};
pub use idempotence::{RemoteState, merge_results, structurally_equal};
pub use updater::{RemoteUpdater, format_errors};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::plugin::PluginError;

/// Rendering of dates inside metadata documents
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S %z";

/// Key of the nested metadata object
pub const METADATA_KEY: &str = "metadata";

/// Key of the section this crate owns inside the metadata object
pub const BACKUP_RESULTS_KEY: &str = "backupResults";

/// Key of the result list inside [`BACKUP_RESULTS_KEY`]
pub const RESULTS_KEY: &str = "results";

/// Outcome of one backup as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupState {
    /// The backup finished
    Done,
    /// The backup is running
    Progress,
    /// The backup failed
    Failed,
}

impl BackupState {
    /// Metadata rendering
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupState::Done => "done",
            BackupState::Progress => "progress",
            BackupState::Failed => "failed",
        }
    }
}

/// One backup of a VM
#[derive(Debug, Clone, PartialEq)]
pub struct BackupStatus {
    /// Backend identifier of the backup
    pub id: Option<String>,
    /// Backup name
    pub name: String,
    /// Backup type
    pub kind: String,
    /// When the backup was taken, in the user's offset
    pub date: Option<DateTime<FixedOffset>>,
    /// Size in bytes
    pub size: u64,
    /// Result
    pub state: BackupState,
    /// Failure reason, if any
    pub reason: Option<String>,
}

impl BackupStatus {
    /// A `complete` backup with the given result
    pub fn new(name: impl Into<String>, state: BackupState) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind: "complete".to_string(),
            date: None,
            size: 0,
            state,
            reason: None,
        }
    }

    /// Metadata rendering
    pub fn to_metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(date) = &self.date {
            map.insert("date".into(), json!(date.format(DATE_FORMAT).to_string()));
        }
        map.insert("status".into(), json!(self.state.as_str()));
        map.insert("name".into(), json!(self.name));
        map.insert("size".into(), json!(self.size));
        map.insert("type".into(), json!(self.kind));
        map.insert("id".into(), json!(self.id));
        map
    }
}

/// One restore of a backup
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreStatus {
    /// Restore type
    pub kind: String,
    /// When the restore ran
    pub date: DateTime<FixedOffset>,
    /// Backend result string
    pub result: String,
    /// Restore point the backend used
    pub restore_point: Option<String>,
}

impl RestoreStatus {
    /// A `complete` restore
    pub fn new(date: DateTime<FixedOffset>, result: impl Into<String>) -> Self {
        Self {
            kind: "complete".to_string(),
            date,
            result: result.into(),
            restore_point: None,
        }
    }

    /// Metadata rendering, naming the restored backup
    pub fn to_metadata(&self, backup: &BackupStatus) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("date".into(), json!(self.date.format(DATE_FORMAT).to_string()));
        map.insert("name".into(), json!(backup.name));
        map.insert("size".into(), json!(backup.size));
        map.insert("type".into(), json!(self.kind));
        map.insert("result".into(), json!(self.result));
        map
    }
}

/// A backup and the restores made from it
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRestorePair {
    /// The backup
    pub backup: BackupStatus,
    /// Restores made from it
    pub restores: Vec<RestoreStatus>,
}

impl BackupRestorePair {
    /// A backup with no restores
    pub fn backup(backup: BackupStatus) -> Self {
        Self {
            backup,
            restores: Vec::new(),
        }
    }

    /// Metadata rendering
    ///
    /// A backup with restores is flagged `restore: requested` and carries
    /// the last restore as `restoreInfo`.
    pub fn to_metadata(&self) -> Value {
        let mut map = self.backup.to_metadata();
        if let Some(restore) = self.restores.last() {
            map.insert("restore".into(), json!("requested"));
            map.insert(
                "restoreInfo".into(),
                Value::Object(restore.to_metadata(&self.backup)),
            );
        }
        Value::Object(map)
    }
}

/// All results for one VM
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBatch {
    /// VM name, as known to the resource cache
    pub entity_name: String,
    /// Backups, oldest first
    pub pairs: Vec<BackupRestorePair>,
}

impl ResultBatch {
    /// Create a batch
    pub fn new(entity_name: impl Into<String>, pairs: Vec<BackupRestorePair>) -> Self {
        Self {
            entity_name: entity_name.into(),
            pairs,
        }
    }

    /// Rendered result list
    pub fn to_results(&self) -> Vec<Value> {
        self.pairs.iter().map(BackupRestorePair::to_metadata).collect()
    }
}

/// Periodically polled producer of result batches
#[async_trait]
pub trait ResultsSource: Send + Sync {
    /// Source name for logs and notifications
    fn name(&self) -> &str;

    /// Results for the given VMs
    ///
    /// Returning no batch for a VM leaves its metadata untouched.
    async fn poll(&self, entities: &[String]) -> Result<Vec<ResultBatch>, PluginError>;
}
