//! Event processing engine
//!
//! - [`Checkpoint`]: monotonic high-water mark of processed event time
//! - [`EventDispatcher`]: worker pool fan-out with per-event completion
//! - [`CatchupReconciler`]: historical replay ahead of live events
//!
//! ## Event Flow
//!
//! 1. A live message is normalized into an [`crate::Event`]
//! 2. The reconciler buffers it (catching up) or dispatches it (live)
//! 3. Each interested plugin processes it on the worker pool
//! 4. Once all have settled, the checkpoint advances to its timestamp

mod barrier;
mod catchup;
mod checkpoint;
mod dispatcher;

pub use barrier::CompletionBarrier;
pub use catchup::{BackfillSummary, CatchupReconciler, CatchupState};
pub use checkpoint::Checkpoint;
pub use dispatcher::{
    DEFAULT_SHUTDOWN_TIMEOUT, DispatchReport, EventDispatcher, Settlement, ShutdownLevel,
};
