//! Notifications
//!
//! Recoverable failures (transport, normalization, plugin, write-back) are
//! reported to the embedding application as [`Notification`]s over a
//! bounded channel. Sending never blocks: when the application falls
//! behind, notifications are dropped with a warning.

use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Plain message
    Message {
        /// Message text
        message: String,
    },
    /// Message with the error that caused it
    Error {
        /// Message text
        message: String,
        /// Rendered error
        error: String,
    },
    /// A remote call answered with a non-success status
    Http {
        /// Message text
        message: String,
        /// Target URL
        url: String,
        /// Response status
        status: u16,
    },
}

impl Notification {
    /// Message text
    pub fn message(&self) -> &str {
        match self {
            Notification::Message { message }
            | Notification::Error { message, .. }
            | Notification::Http { message, .. } => message,
        }
    }

    /// HTTP status, for `Http` notifications
    pub fn status(&self) -> Option<u16> {
        match self {
            Notification::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Message { message } => f.write_str(message),
            Notification::Error { message, error } => write!(f, "{}: {}", message, error),
            Notification::Http {
                message,
                url,
                status,
            } => write!(f, "{} ({} returned {})", message, url, status),
        }
    }
}

/// Cloneable sending half of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Notification>>,
}

impl Notifier {
    /// Create a notifier and the receiver the application drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Report a plain message
    pub fn notify(&self, message: impl Into<String>) {
        self.emit(Notification::Message {
            message: message.into(),
        });
    }

    /// Report a message with the error that caused it
    pub fn notify_error(&self, message: impl Into<String>, error: &dyn fmt::Display) {
        self.emit(Notification::Error {
            message: message.into(),
            error: error.to_string(),
        });
    }

    /// Report a non-success remote call
    pub fn notify_http(&self, message: impl Into<String>, url: impl Into<String>, status: u16) {
        self.emit(Notification::Http {
            message: message.into(),
            url: url.into(),
            status,
        });
    }

    fn emit(&self, notification: Notification) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("Notification channel full, dropping notification: {}", dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Application stopped listening
            }
        }
    }
}
