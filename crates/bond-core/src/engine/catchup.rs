//! Catch-up reconciliation
//!
//! On restart the process may have missed events. When a prior checkpoint
//! exists the reconciler starts in [`CatchupState::Backfilling`]: live
//! events are buffered while the historical log is replayed, then the
//! buffer is drained and the reconciler switches to [`CatchupState::Live`].
//!
//! ## Ordering
//!
//! 1. Historical entries after the checkpoint, in log order
//! 2. Live events received during the replay, in arrival order
//! 3. Live events received afterwards
//!
//! The switch to `Live` happens under the same lock that guards the buffer,
//! so no live event can slip between the last drained one and the switch.
//! The buffer is drained batch by batch, waiting for each batch to settle,
//! until it is observed empty.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use super::dispatcher::EventDispatcher;
use crate::event::Event;
use crate::notify::Notifier;
use crate::traits::{HistoricalLog, Normalizer};

/// Reconciler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupState {
    /// Replaying history; live events are buffered
    Backfilling,
    /// Live events are dispatched directly
    Live,
}

/// Counters for one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Historical events dispatched
    pub replayed: usize,
    /// Entries the normalizer chose to ignore
    pub ignored: usize,
    /// Entries that failed to normalize
    pub failed: usize,
    /// Entries skipped because the live stream already carries them
    pub skipped: usize,
    /// Buffered live events dispatched after the replay
    pub drained: usize,
    /// Whether the log stream ended with an error
    pub interrupted: bool,
}

#[derive(Debug)]
struct Inner {
    state: CatchupState,
    buffer: VecDeque<Event>,
    live_start: Option<DateTime<Utc>>,
}

/// Serializes historical replay ahead of live events
pub struct CatchupReconciler {
    dispatcher: Arc<EventDispatcher>,
    since: Option<DateTime<Utc>>,
    inner: Mutex<Inner>,
}

impl CatchupReconciler {
    /// Create a reconciler resuming after `since`
    ///
    /// With no prior checkpoint there is nothing to replay and the
    /// reconciler starts live.
    pub fn new(dispatcher: Arc<EventDispatcher>, since: Option<DateTime<Utc>>) -> Self {
        let state = if since.is_some() {
            CatchupState::Backfilling
        } else {
            CatchupState::Live
        };
        Self {
            dispatcher,
            since,
            inner: Mutex::new(Inner {
                state,
                buffer: VecDeque::new(),
                live_start: None,
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> CatchupState {
        self.lock().state
    }

    /// Number of buffered live events
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Record when the live connection was established
    ///
    /// Historical entries stamped after this instant are skipped during the
    /// replay.
    pub fn mark_live_start(&self, at: DateTime<Utc>) {
        self.lock().live_start = Some(at);
    }

    /// Admit a live event
    ///
    /// Buffered while backfilling, dispatched otherwise.
    pub fn admit(&self, event: Event) {
        {
            let mut inner = self.lock();
            if inner.state == CatchupState::Backfilling {
                debug!(action = %event.action, "Buffering live event during catch-up");
                inner.buffer.push_back(event);
                return;
            }
        }
        self.dispatcher.dispatch(event);
    }

    /// Replay the historical log, then drain the buffer and go live
    ///
    /// A no-op when the reconciler started live.
    pub async fn backfill(
        &self,
        log: &dyn HistoricalLog,
        normalizer: &dyn Normalizer,
        notifier: &Notifier,
    ) -> BackfillSummary {
        let mut summary = BackfillSummary::default();
        let Some(since) = self.since else {
            return summary;
        };
        if self.state() == CatchupState::Live {
            return summary;
        }

        let live_start = self.lock().live_start;
        info!("Replaying missed events since {}", since.to_rfc3339());

        let mut last_replayed: Option<Event> = None;
        let mut entries = log.fetch_since(since);
        while let Some(entry) = entries.next().await {
            let raw = match entry {
                Ok(raw) => raw,
                Err(e) => {
                    error!("Historical event log failed: {}", e);
                    notifier.notify_error("Failed to retrieve missed events", &e);
                    summary.interrupted = true;
                    break;
                }
            };

            let ts = match raw.occurred_at() {
                Ok(ts) => ts,
                Err(e) => {
                    warn!("Dropping historical entry: {}", e);
                    notifier.notify_error("Exception whilst translating missed event", &e);
                    summary.failed += 1;
                    continue;
                }
            };
            if ts <= since {
                continue;
            }
            if live_start.is_some_and(|start| ts > start) {
                summary.skipped += 1;
                continue;
            }

            match normalizer.normalize(raw).await {
                Ok(Some(event)) => {
                    if last_replayed
                        .as_ref()
                        .is_some_and(|prev| event.chronological(prev).is_lt())
                    {
                        warn!(
                            "Historical log returned entries out of order at {}",
                            event.timestamp.to_rfc3339()
                        );
                    }
                    last_replayed = Some(event.clone());
                    self.dispatcher.dispatch(event);
                    summary.replayed += 1;
                }
                Ok(None) => summary.ignored += 1,
                Err(e) => {
                    warn!("Dropping historical entry: {}", e);
                    notifier.notify_error("Exception whilst translating missed event", &e);
                    summary.failed += 1;
                }
            }
        }

        summary.drained = self.drain_and_go_live().await;
        info!(
            replayed = summary.replayed,
            drained = summary.drained,
            skipped = summary.skipped,
            "Catch-up complete, processing live events"
        );
        summary
    }

    /// Dispatch buffered events until the buffer is observed empty
    ///
    /// Each batch is settled before the buffer is checked again, so events
    /// admitted while a batch is being processed are drained too.
    async fn drain_and_go_live(&self) -> usize {
        let mut drained = 0;
        loop {
            let batch: Vec<Event> = {
                let mut inner = self.lock();
                if inner.buffer.is_empty() {
                    inner.state = CatchupState::Live;
                    break;
                }
                inner.buffer.drain(..).collect()
            };
            drained += batch.len();
            debug!("Draining {} buffered live event(s)", batch.len());

            let pending: Vec<_> = batch
                .into_iter()
                .filter_map(|event| self.dispatcher.dispatch_tracked(event))
                .collect();
            for settled in pending {
                // Abandoned by a shutdown
                if settled.await.is_err() {
                    debug!("Buffered event abandoned while draining");
                }
            }
        }
        drained
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
