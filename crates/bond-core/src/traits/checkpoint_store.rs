// # Checkpoint Store Trait
//
// Persists the processing checkpoint between runs.
//
// The in-process `Checkpoint` is the source of truth while running. A store
// is read once at startup to seed it and written when the process stops,
// so a restart resumes the catch-up from where the last run left off.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for checkpoint persistence
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last saved checkpoint
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ts))`: a previous run processed events up to `ts`
    /// - `Ok(None)`: first run
    /// - `Err(Error)`: storage error
    async fn load(&self) -> Result<Option<DateTime<Utc>>, crate::Error>;

    /// Record `ts` as the checkpoint
    ///
    /// Stores never move backwards: saving an older value is a no-op.
    async fn save(&self, ts: DateTime<Utc>) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
