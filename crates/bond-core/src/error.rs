//! Error types for the bond system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for bond operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the bond system
#[derive(Error, Debug)]
pub enum Error {
    /// Live transport errors (connect, disconnect, stream failures)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A raw message or log entry could not be turned into an event
    #[error("Normalization error: {0}")]
    Normalize(String),

    /// Historical event log errors
    #[error("Event log error: {0}")]
    EventLog(String),

    /// Plugin loading or startup errors
    #[error("Plugin error ({plugin}): {message}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// Error message
        message: String,
    },

    /// Checkpoint store errors
    #[error("Checkpoint store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote API does not speak the version this build expects
    #[error("API version mismatch: expected {expected}, server reports {actual}")]
    VersionMismatch {
        /// Version requested in configuration
        expected: String,
        /// Version reported by the server
        actual: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from the resource API)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Remote call answered with a non-success status
    #[error("HTTP status {status} from {url}: {message}")]
    HttpStatus {
        /// Message describing the failed call
        message: String,
        /// Target URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a normalization error
    pub fn normalize(msg: impl Into<String>) -> Self {
        Self::Normalize(msg.into())
    }

    /// Create an event log error
    pub fn event_log(msg: impl Into<String>) -> Self {
        Self::EventLog(msg.into())
    }

    /// Create a plugin error
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a checkpoint store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an HTTP status error
    pub fn http_status(message: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            message: message.into(),
            url: url.into(),
            status,
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error must abort startup rather than be reported
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::VersionMismatch { .. } | Self::Plugin { .. }
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
