//! Typed handler table
//!
//! Maps each [`EventKind`] a plugin supports to exactly one async handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::PluginError;
use crate::event::{Event, EventKind};

/// Boxed future returned by a handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send>>;

/// A type-erased event handler
pub type Handler = Arc<dyn Fn(Arc<Event>) -> HandlerFuture + Send + Sync>;

/// Immutable kind → handler map
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, Handler>,
}

impl HandlerTable {
    /// Start building a table
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    /// Handler for `kind`
    pub fn get(&self, kind: EventKind) -> Option<&Handler> {
        self.handlers.get(&kind)
    }

    /// Whether a handler exists for `kind`
    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Declared kinds, sorted
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Number of handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is declared
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Builder for [`HandlerTable`]
#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: HashMap<EventKind, Handler>,
    duplicate: Option<EventKind>,
}

impl HandlerTableBuilder {
    /// Register `handler` for `kind`
    ///
    /// Registering a second handler for the same kind makes `build` fail.
    pub fn on<F, Fut>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PluginError>> + Send + 'static,
    {
        if self.handlers.contains_key(&kind) {
            self.duplicate.get_or_insert(kind);
            return self;
        }
        let handler: Handler = Arc::new(move |event| -> HandlerFuture { Box::pin(handler(event)) });
        self.handlers.insert(kind, handler);
        self
    }

    /// Finish the table
    pub fn build(self) -> Result<HandlerTable, PluginError> {
        if let Some(kind) = self.duplicate {
            return Err(PluginError::DuplicateHandler(kind));
        }
        Ok(HandlerTable {
            handlers: self.handlers,
        })
    }
}
