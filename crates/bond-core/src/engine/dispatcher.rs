//! Event dispatcher
//!
//! Fans each event out to the plugins that declared its kind, on a fixed
//! pool of worker tasks, and advances the checkpoint once every interested
//! plugin has settled the event.
//!
//! ## Architecture
//!
//! ```text
//!  dispatch(event)
//!        │  one Task per interested plugin
//!        ▼
//! ┌──────────────┐      ┌──────────┐
//! │  job queue   │ ───▶ │ worker 1 │──┐
//! │ (unbounded)  │ ───▶ │ worker N │──┤ settle
//! └──────────────┘      └──────────┘  ▼
//!                            ┌───────────────────┐
//!                            │ CompletionBarrier │──▶ Checkpoint
//!                            └───────────────────┘
//! ```
//!
//! Each plugin call is spawned as its own task and awaited by the worker,
//! so a panicking plugin only loses its own settlement. Such a settlement
//! carries no outcome and never advances the checkpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::barrier::CompletionBarrier;
use super::checkpoint::Checkpoint;
use crate::event::{Event, EventOutcome, OutcomeState};
use crate::notify::Notifier;
use crate::plugin::{Plugin, process_event};
use crate::registry::PluginRegistry;

/// Default upper bound on the shutdown wait
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(300);

/// How to treat outstanding work on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownLevel {
    /// Finish queued and running tasks
    AwaitAllTasks,
    /// Abandon queued tasks, finish running ones
    AwaitRunningTasks,
    /// Abort everything without waiting
    Immediate,
}

/// How one plugin task settled
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The plugin produced an outcome for the event
    Outcome(EventOutcome),
    /// The task ended without an outcome (panic, cancellation, abort)
    Detached {
        /// Plugin name
        plugin: String,
        /// Why no outcome exists
        reason: String,
    },
}

/// Summary emitted once an event has been settled by every interested plugin
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// The event
    pub event: Arc<Event>,
    /// One settlement per interested plugin
    pub settlements: Vec<Settlement>,
    /// Checkpoint value after the event completed
    pub checkpoint: Option<DateTime<Utc>>,
}

impl DispatchReport {
    /// Outcomes, ignoring detached settlements
    pub fn outcomes(&self) -> impl Iterator<Item = &EventOutcome> {
        self.settlements.iter().filter_map(|s| match s {
            Settlement::Outcome(outcome) => Some(outcome),
            Settlement::Detached { .. } => None,
        })
    }
}

struct Task {
    plugin: Arc<dyn Plugin>,
    event: Arc<Event>,
    barrier: Arc<CompletionBarrier<Settlement>>,
}

type Running = Arc<Mutex<HashMap<usize, AbortHandle>>>;

/// Bounded-concurrency fan-out of events to plugins
pub struct EventDispatcher {
    registry: Arc<PluginRegistry>,
    checkpoint: Arc<Checkpoint>,
    notifier: Notifier,
    queue: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    abandon_queued: Arc<AtomicBool>,
    running: Running,
    workers: Mutex<Vec<JoinHandle<()>>>,
    report_tx: mpsc::Sender<DispatchReport>,
}

impl EventDispatcher {
    /// Create a dispatcher with `workers` pool tasks
    ///
    /// Must be called from within a Tokio runtime. Returns the dispatcher
    /// and a receiver of per-event reports; reports are dropped when the
    /// receiver falls behind or is gone.
    pub fn new(
        registry: Arc<PluginRegistry>,
        checkpoint: Arc<Checkpoint>,
        notifier: Notifier,
        workers: usize,
        report_capacity: usize,
    ) -> (Self, mpsc::Receiver<DispatchReport>) {
        let (tx, rx) = mpsc::unbounded_channel::<Task>();
        let (report_tx, report_rx) = mpsc::channel(report_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let abandon_queued = Arc::new(AtomicBool::new(false));
        let running: Running = Arc::new(Mutex::new(HashMap::new()));

        let handles = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    abandon_queued.clone(),
                    running.clone(),
                ))
            })
            .collect();

        info!("Dispatcher started with {} worker(s)", workers.max(1));

        let dispatcher = Self {
            registry,
            checkpoint,
            notifier,
            queue: Mutex::new(Some(tx)),
            abandon_queued,
            running,
            workers: Mutex::new(handles),
            report_tx,
        };
        (dispatcher, report_rx)
    }

    /// Submit `event` to every interested plugin
    ///
    /// Returns immediately. An event no plugin declared is dropped.
    pub fn dispatch(&self, event: Event) {
        let _ = self.dispatch_tracked(event);
    }

    /// Like [`dispatch`](Self::dispatch), with a receiver that resolves once
    /// every interested plugin has settled the event
    ///
    /// `None` when the event was dropped. The receiver errors instead if the
    /// event's tasks are abandoned by a shutdown.
    pub fn dispatch_tracked(&self, event: Event) -> Option<oneshot::Receiver<()>> {
        let interested = self.registry.interested(event.kind);
        if interested.is_empty() {
            debug!(kind = ?event.kind, action = %event.action, "No plugin interested in event");
            return None;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let event = Arc::new(event);
        let barrier = Arc::new(CompletionBarrier::new(interested.len(), {
            let checkpoint = self.checkpoint.clone();
            let notifier = self.notifier.clone();
            let report_tx = self.report_tx.clone();
            let event = event.clone();
            move |settlements| {
                complete_event(&checkpoint, &notifier, &report_tx, event, settlements);
                let _ = done_tx.send(());
            }
        }));

        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = queue.as_ref() else {
            warn!(action = %event.action, "Dispatcher is shut down, dropping event");
            return None;
        };

        debug!(
            kind = ?event.kind,
            action = %event.action,
            plugins = interested.len(),
            "Dispatching event"
        );
        for plugin in interested {
            let task = Task {
                plugin: plugin.clone(),
                event: event.clone(),
                barrier: barrier.clone(),
            };
            if tx.send(task).is_err() {
                warn!("Dispatch queue closed, dropping task for {}", plugin.name());
            }
        }
        Some(done_rx)
    }

    /// Current checkpoint
    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.checkpoint.get()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop the pool with the default timeout
    pub async fn shutdown(&self, level: ShutdownLevel) {
        self.shutdown_with_timeout(level, DEFAULT_SHUTDOWN_TIMEOUT)
            .await
    }

    /// Stop the pool
    ///
    /// New events are rejected from this point on. An exceeded timeout is
    /// logged; remaining tasks keep running detached.
    pub async fn shutdown_with_timeout(&self, level: ShutdownLevel, timeout: Duration) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));

        info!("Shutting down dispatcher ({:?})", level);

        match level {
            ShutdownLevel::AwaitAllTasks => {}
            ShutdownLevel::AwaitRunningTasks => {
                self.abandon_queued.store(true, Ordering::SeqCst);
            }
            ShutdownLevel::Immediate => {
                self.abandon_queued.store(true, Ordering::SeqCst);
                for (_, handle) in self
                    .running
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .drain()
                {
                    handle.abort();
                }
                for worker in &workers {
                    worker.abort();
                }
                return;
            }
        }

        let join_all = async {
            for worker in workers {
                if let Err(e) = worker.await {
                    error!("Dispatch worker ended abnormally: {}", e);
                }
            }
        };
        if tokio::time::timeout(timeout, join_all).await.is_err() {
            warn!(
                "Dispatcher did not terminate within {:?}, leaving tasks running",
                timeout
            );
        }
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Task>>>,
    abandon_queued: Arc<AtomicBool>,
    running: Running,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(Task {
            plugin,
            event,
            barrier,
        }) = task
        else {
            break;
        };

        if abandon_queued.load(Ordering::SeqCst) {
            debug!(worker = id, "Abandoning queued task for {}", plugin.name());
            continue;
        }

        let name = plugin.name().to_string();
        if !plugin.is_running() {
            barrier.settle(Settlement::Detached {
                plugin: name,
                reason: "plugin cancelled before the task started".to_string(),
            });
            continue;
        }

        let handle = tokio::spawn(process_event(plugin, event));
        running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.abort_handle());

        let settlement = match handle.await {
            Ok(outcome) => Settlement::Outcome(outcome),
            Err(e) => Settlement::Detached {
                plugin: name,
                reason: e.to_string(),
            },
        };

        running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        barrier.settle(settlement);
    }
    debug!(worker = id, "Dispatch worker stopped");
}

fn complete_event(
    checkpoint: &Checkpoint,
    notifier: &Notifier,
    report_tx: &mpsc::Sender<DispatchReport>,
    event: Arc<Event>,
    settlements: Vec<Settlement>,
) {
    for settlement in &settlements {
        match settlement {
            Settlement::Outcome(outcome) => {
                if outcome.state == OutcomeState::Failed {
                    let detail = outcome.detail.as_deref().unwrap_or("unknown error");
                    warn!(
                        "Plugin {} failed to process {} event: {}",
                        outcome.plugin, outcome.event.action, detail
                    );
                    notifier.notify_error(
                        format!(
                            "Plugin {} failed to process event {}",
                            outcome.plugin, outcome.event.action
                        ),
                        &detail,
                    );
                }
                checkpoint.advance(outcome.event.timestamp);
            }
            Settlement::Detached { plugin, reason } => {
                error!(
                    "Plugin {} settled {} event without an outcome: {}",
                    plugin, event.action, reason
                );
            }
        }
    }

    let report = DispatchReport {
        event,
        settlements,
        checkpoint: checkpoint.get(),
    };
    if let Err(mpsc::error::TrySendError::Full(_)) = report_tx.try_send(report) {
        debug!("Dispatch report channel full, dropping report");
    }
}
