// # Memory Checkpoint Store
//
// In-memory implementation of CheckpointStore.
//
// Nothing survives a restart: every run starts live with no catch-up.
// Useful for tests and for embedders that persist the checkpoint
// themselves through `OutboundClient::last_processed_timestamp`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::CheckpointStore;

/// In-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `ts`
    pub fn with_value(ts: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(ts))),
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, Error> {
        Ok(*self.inner.read().await)
    }

    async fn save(&self, ts: DateTime<Utc>) -> Result<(), Error> {
        let mut value = self.inner.write().await;
        if value.is_none_or(|current| current < ts) {
            *value = Some(ts);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_memory_store_never_regresses() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load().await.unwrap(), None);

        let later = Utc.timestamp_opt(200, 0).unwrap();
        let earlier = Utc.timestamp_opt(100, 0).unwrap();

        store.save(later).await.unwrap();
        store.save(earlier).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryCheckpointStore::with_value(Utc.timestamp_opt(1, 0).unwrap());
        let clone = store.clone();

        let ts = Utc.timestamp_opt(5, 0).unwrap();
        clone.save(ts).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(ts));
    }
}
