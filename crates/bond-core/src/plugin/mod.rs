// # Plugin Trait
//
// Plugins are the consumers events are fanned out to. Each plugin declares
// the event kinds it handles through a [`HandlerTable`]; the dispatcher
// only submits events whose kind appears in the table.
//
// ## Lifecycle
//
// 1. Built from an explicit list (or a `PluginCatalog`) at startup
// 2. `startup()` runs once before any event is dispatched
// 3. Handlers run on the dispatcher's worker pool
// 4. `cancel()` is called on close; tasks not yet started are skipped
//
// ## Example
//
// ```rust,ignore
// struct Audit { handlers: HandlerTable, cancel: CancelFlag }
//
// impl Audit {
//     fn new() -> Result<Self, PluginError> {
//         let handlers = HandlerTable::builder()
//             .on(EventKind::Deploy, |event| async move {
//                 tracing::info!(vm = ?event.vm_name(), "deployed");
//                 Ok(())
//             })
//             .build()?;
//         Ok(Self { handlers, cancel: CancelFlag::new() })
//     }
// }
// ```

mod handlers;

pub use handlers::{Handler, HandlerFuture, HandlerTable, HandlerTableBuilder};

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::event::{Event, EventKind, EventOutcome};
use crate::results::ResultsSource;

/// Error type for plugin code
#[derive(Error, Debug)]
pub enum PluginError {
    /// The handler could not process the event
    #[error("{0}")]
    Processing(String),

    /// A remote call made by the plugin failed
    #[error("{message} ({url} returned {status})")]
    Http {
        /// Message describing the failed call
        message: String,
        /// Target URL
        url: String,
        /// Response status
        status: u16,
    },

    /// One-time startup failed
    #[error("startup failed: {0}")]
    Startup(String),

    /// Two handlers were registered for the same kind
    #[error("more than one handler registered for {0:?} events")]
    DuplicateHandler(EventKind),
}

impl PluginError {
    /// Create a processing error
    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a startup error
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }
}

impl From<PluginError> for crate::Error {
    fn from(err: PluginError) -> Self {
        crate::Error::Other(err.to_string())
    }
}

/// Trait for plugin implementations
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O against the plugin's own backend
/// - ✅ Expose a [`ResultsSource`] for periodic result polling
///
/// ## Forbidden Capabilities
/// - ❌ Touch the checkpoint (owned by `EventDispatcher`)
/// - ❌ Write to the management server directly (use `ResultsSource`)
/// - ❌ Block the worker thread with synchronous I/O
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Human-readable plugin name, unique within a registry
    fn name(&self) -> &str;

    /// Typed handlers, one per supported kind
    fn handlers(&self) -> &HandlerTable;

    /// One-time initialization before dispatch starts
    async fn startup(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Stop accepting work
    fn cancel(&self);

    /// Whether the plugin still accepts work
    fn is_running(&self) -> bool;

    /// Results this plugin produces asynchronously, if any
    fn results_source(&self) -> Option<Arc<dyn ResultsSource>> {
        None
    }

    /// Whether the plugin has a handler for `kind`
    fn handles(&self, kind: EventKind) -> bool {
        self.handlers().handles(kind)
    }
}

/// Run the plugin's handler for `event` and turn the result into an outcome
pub async fn process_event(plugin: Arc<dyn Plugin>, event: Arc<Event>) -> EventOutcome {
    let Some(handler) = plugin.handlers().get(event.kind) else {
        return EventOutcome::unsupported(plugin.name(), event);
    };

    match handler(event.clone()).await {
        Ok(()) => EventOutcome::complete(plugin.name(), event),
        Err(e) => EventOutcome::failed(plugin.name(), event, e.to_string()),
    }
}

/// Per-plugin cancellation flag
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    /// A flag in the running state
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark as cancelled
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
