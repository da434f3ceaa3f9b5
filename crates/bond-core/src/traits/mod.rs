//! Core traits for the bond system
//!
//! This module defines the collaborator interfaces the core consumes.
//!
//! - [`Connector`] / [`CommsHandler`]: live transport and its callback surface
//! - [`Normalizer`] / [`EntityResolver`]: raw message → typed event
//! - [`HistoricalLog`]: paginated replay of past events
//! - [`ResourceClient`]: fetch and write remote entities
//! - [`CheckpointStore`]: persistence of the checkpoint across restarts

pub mod checkpoint_store;
pub mod connector;
pub mod history;
pub mod normalizer;
pub mod resource_client;

pub use checkpoint_store::CheckpointStore;
pub use connector::{CommsHandler, Connector, Transport};
pub use history::{HistoricalLog, LogStream};
pub use normalizer::{EntityResolver, Normalizer, RawEvent};
pub use resource_client::{HttpResponse, ResourceClient};
