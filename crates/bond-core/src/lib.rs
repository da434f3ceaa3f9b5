// # bond-core
//
// Core library for the bond outbound event bridge.
//
// ## Architecture Overview
//
// This library ingests change events from a remote management server and
// fans them out to independently registered plugins:
// - **Connector / CommsHandler**: live transport callbacks (external)
// - **Normalizer**: raw message → typed [`Event`] ([`EventTranslator`])
// - **CatchupReconciler**: replays the historical log before going live
// - **EventDispatcher**: bounded worker pool, per-event completion barrier
// - **Checkpoint**: monotonic high-water mark of fully processed events
// - **ResultsHandler**: single write-back worker fed by polling plugins
// - **OutboundClient**: the pipeline context that owns all of the above
//
// ## Design Principles
//
// 1. **Non-blocking ingest**: the live callback path never waits on plugins
// 2. **No lost events**: the checkpoint only covers settled events
// 3. **Isolated failures**: one bad event or batch never halts a worker
// 4. **Library-First**: the daemon is a thin wrapper around this crate
// 5. **Idempotent write-back**: unchanged remote state is never rewritten

pub mod cache;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod notify;
pub mod plugin;
pub mod registry;
pub mod results;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use cache::ResourceCache;
pub use client::{Collaborators, OutboundClient};
pub use config::{BondConfig, DispatchConfig, PluginConfig, ResultsConfig};
pub use engine::{CatchupReconciler, CatchupState, Checkpoint, EventDispatcher, ShutdownLevel};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventOutcome, EventTranslator, OutcomeState, VirtualMachine};
pub use notify::{Notification, Notifier};
pub use plugin::{CancelFlag, HandlerTable, Plugin, PluginError};
pub use registry::{PluginCatalog, PluginRegistry};
pub use results::{ResultBatch, ResultsHandler, ResultsSource};
pub use state::{FileCheckpointStore, MemoryCheckpointStore};
pub use traits::{
    CheckpointStore, CommsHandler, Connector, EntityResolver, HistoricalLog, HttpResponse,
    Normalizer, RawEvent, ResourceClient, Transport,
};
