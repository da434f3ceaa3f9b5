//! Remote updater
//!
//! Performs the metadata write-back and reports failures with the error
//! codes the server returned.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use crate::notify::Notifier;
use crate::traits::ResourceClient;

const UNREADABLE_ERROR: &str = "Cannot deserialize error";

#[derive(Debug, Deserialize)]
struct ErrorCollection {
    collection: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    code: String,
    message: String,
}

/// Render a server error body as `code-message,code-message`
///
/// Bodies that are not an error collection render as a fixed fallback.
pub fn format_errors(body: &str) -> String {
    match serde_json::from_str::<ErrorCollection>(body) {
        Ok(errors) => errors
            .collection
            .iter()
            .map(|e| format!("{}-{}", e.code, e.message))
            .collect::<Vec<_>>()
            .join(","),
        Err(_) => UNREADABLE_ERROR.to_string(),
    }
}

/// Writes merged metadata back to the server
#[derive(Clone)]
pub struct RemoteUpdater {
    client: Arc<dyn ResourceClient>,
    notifier: Notifier,
}

impl RemoteUpdater {
    /// Create an updater
    pub fn new(client: Arc<dyn ResourceClient>, notifier: Notifier) -> Self {
        Self { client, notifier }
    }

    /// PUT `body` to `link`
    ///
    /// Returns the response status, or `None` on transport failure. Every
    /// failure has already been logged and notified.
    pub async fn write(&self, entity_name: &str, link: &str, body: &Value) -> Option<u16> {
        let payload = match serde_json::to_string(body) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize metadata of vm {}: {}", entity_name, e);
                self.notifier.notify_error(
                    format!("Failed to serialize backup results of {}", entity_name),
                    &e,
                );
                return None;
            }
        };

        match self.client.write_entity(link, &payload).await {
            Ok(response) if response.is_success() => {
                debug!(
                    "Backup/restore results of vm {} updated successfully",
                    entity_name
                );
                Some(response.status)
            }
            Ok(response) => {
                let cause = format_errors(&response.body);
                error!(
                    "Error occurred while updating the metadata of vm {}: {} {}",
                    entity_name, response.status, cause
                );
                self.notifier.notify_http(
                    format!(
                        "Failed to update backup results of {}: {}",
                        entity_name, cause
                    ),
                    link,
                    response.status,
                );
                Some(response.status)
            }
            Err(e) => {
                error!("Failed to update the metadata of vm {}: {}", entity_name, e);
                self.notifier.notify_error(
                    format!("Failed to update backup results of {}", entity_name),
                    &e,
                );
                None
            }
        }
    }
}
