//! Result aggregation
//!
//! [`ResultsHandler`] owns one polling task per [`ResultsSource`] and the
//! single write-back task. Batches from all sources go through one
//! unbounded queue, so at most one write-back is in flight at any time.
//!
//! Each write-back and each poll runs as its own task. A panic there loses
//! that batch or that tick only; the loops keep going.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::idempotence::RemoteState;
use super::updater::RemoteUpdater;
use super::{ResultBatch, ResultsSource};
use crate::cache::{METADATA_REL, ResourceCache};
use crate::notify::Notifier;
use crate::traits::ResourceClient;

/// What happened to one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The entity has no cached metadata link
    NoLink,
    /// Fetching the current metadata failed (status, or `None` for transport)
    FetchFailed(Option<u16>),
    /// The fetched document was not JSON
    Unreadable,
    /// The document has no metadata section
    MissingMetadata,
    /// Nothing would change
    Unchanged,
    /// Written with the given success status
    Written(u16),
    /// The write failed (status, or `None` for transport)
    WriteFailed(Option<u16>),
}

/// Processes one batch end to end
pub struct ResultsWriter {
    cache: Arc<ResourceCache>,
    client: Arc<dyn ResourceClient>,
    notifier: Notifier,
    updater: RemoteUpdater,
}

impl ResultsWriter {
    /// Create a writer
    pub fn new(cache: Arc<ResourceCache>, client: Arc<dyn ResourceClient>, notifier: Notifier) -> Self {
        let updater = RemoteUpdater::new(client.clone(), notifier.clone());
        Self {
            cache,
            client,
            notifier,
            updater,
        }
    }

    /// Merge `batch` into the entity's metadata and write it if it changed
    pub async fn process(&self, batch: ResultBatch) -> BatchOutcome {
        let name = batch.entity_name.as_str();
        let Some(link) = self.cache.link(name, METADATA_REL) else {
            error!("No metadata link found for vm {}", name);
            return BatchOutcome::NoLink;
        };

        let response = match self.client.fetch_entity(&link).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to retrieve current metadata for vm {}: {}", name, e);
                self.notifier
                    .notify_error("Failed to retrieve current metadata", &e);
                return BatchOutcome::FetchFailed(None);
            }
        };
        if !response.is_success() {
            error!(
                "Failed to retrieve current metadata for vm {}: status {}",
                name, response.status
            );
            self.notifier
                .notify_http("Failed to retrieve current metadata", &link, response.status);
            return BatchOutcome::FetchFailed(Some(response.status));
        }

        let document: Value = match serde_json::from_str(&response.body) {
            Ok(document) => document,
            Err(e) => {
                error!("Unreadable metadata for vm {}: {}", name, e);
                self.notifier
                    .notify_error(format!("Unreadable metadata of {}", name), &e);
                return BatchOutcome::Unreadable;
            }
        };

        let Some(state) = RemoteState::from_document(&document, &batch) else {
            if !batch.pairs.is_empty() {
                error!(
                    "Failed to update backup status for vm {} because original metadata is null",
                    name
                );
                self.notifier.notify_http(
                    format!(
                        "Failed to update backup status of {} because original metadata is null",
                        name
                    ),
                    &link,
                    response.status,
                );
            }
            return BatchOutcome::MissingMetadata;
        };

        if state.is_noop() {
            debug!(
                "No changes from backup/restore of vm {} detected, skipping update",
                name
            );
            return BatchOutcome::Unchanged;
        }

        match self
            .updater
            .write(name, &link, &state.write_body(&document))
            .await
        {
            Some(status) if (200..300).contains(&status) => BatchOutcome::Written(status),
            other => BatchOutcome::WriteFailed(other),
        }
    }
}

/// Polling tasks plus the single write-back worker
pub struct ResultsHandler {
    tx: mpsc::UnboundedSender<ResultBatch>,
    cache: Arc<ResourceCache>,
    notifier: Notifier,
    period: Duration,
    pollers: Mutex<Vec<JoinHandle<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ResultsHandler {
    /// Start the write-back worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(writer: ResultsWriter, period: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = writer.cache.clone();
        let notifier = writer.notifier.clone();
        let worker = tokio::spawn(write_back_loop(Arc::new(writer), rx));
        debug!("Results handler started");

        Self {
            tx,
            cache,
            notifier,
            period,
            pollers: Mutex::new(Vec::new()),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Poll `source` every period, starting now
    pub fn add_source(&self, source: Arc<dyn ResultsSource>) {
        info!(
            "Results source {} polling every {:?}",
            source.name(),
            self.period
        );
        let handle = tokio::spawn(poll_loop(
            source,
            self.cache.clone(),
            self.tx.clone(),
            self.notifier.clone(),
            self.period,
        ));
        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Queue a batch directly
    ///
    /// Returns `false` once the handler is shut down.
    pub fn submit(&self, batch: ResultBatch) -> bool {
        let running = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        running && self.tx.send(batch).is_ok()
    }

    /// Number of polling tasks
    pub fn sources(&self) -> usize {
        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop all pollers and the worker
    pub fn shutdown(&self) {
        for poller in self
            .pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            poller.abort();
        }
        if let Some(worker) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            worker.abort();
        }
        debug!("Results handler stopped");
    }
}

async fn write_back_loop(writer: Arc<ResultsWriter>, mut rx: mpsc::UnboundedReceiver<ResultBatch>) {
    while let Some(batch) = rx.recv().await {
        let name = batch.entity_name.clone();
        let handle = tokio::spawn({
            let writer = writer.clone();
            async move { writer.process(batch).await }
        });
        match handle.await {
            Ok(outcome) => debug!(vm = %name, ?outcome, "Processed result batch"),
            Err(e) => {
                error!("Write-back of results for vm {} aborted: {}", name, e);
                writer
                    .notifier
                    .notify_error(format!("Failed to write back results of {}", name), &e);
            }
        }
    }
}

async fn poll_loop(
    source: Arc<dyn ResultsSource>,
    cache: Arc<ResourceCache>,
    tx: mpsc::UnboundedSender<ResultBatch>,
    notifier: Notifier,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let entities = cache.names();
        let polled = tokio::spawn({
            let source = source.clone();
            async move { source.poll(&entities).await }
        })
        .await;

        match polled {
            Ok(Ok(batches)) => {
                debug!(
                    "Results source {} produced {} batch(es)",
                    source.name(),
                    batches.len()
                );
                for batch in batches {
                    if tx.send(batch).is_err() {
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Results source {} failed: {}", source.name(), e);
                notifier.notify_error(
                    format!("Failed to fetch results from {}", source.name()),
                    &e,
                );
            }
            Err(e) => {
                error!("Results source {} aborted a poll: {}", source.name(), e);
                notifier.notify_error(
                    format!("Failed to fetch results from {}", source.name()),
                    &e,
                );
            }
        }
    }
}
