// # Normalizer Trait
//
// Turns raw records from the live stream or the historical log into typed
// events. The default implementation is `EventTranslator`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{Event, VirtualMachine};

/// Raw event record as delivered by the server
///
/// The live stream and the historical log both carry this shape; the
/// historical log implementation maps its own rows onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Logical entity type (`VIRTUAL_MACHINE`, `USER`, ...)
    #[serde(rename = "type")]
    pub event_type: String,

    /// Action performed on the entity
    pub action: String,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Acting user
    #[serde(default)]
    pub user: String,

    /// Entity identifier (an API path for resolvable entities)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_identifier: Option<String>,

    /// Severity as reported by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    /// Free-form details
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl RawEvent {
    /// Create a raw record with no details
    pub fn new(
        event_type: impl Into<String>,
        action: impl Into<String>,
        timestamp: DateTime<Utc>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            action: action.into(),
            timestamp: timestamp.timestamp_millis(),
            user: user.into(),
            entity_identifier: None,
            severity: None,
            details: Map::new(),
        }
    }

    /// Attach an entity identifier
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity_identifier = Some(entity.into());
        self
    }

    /// Attach a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Parse a raw live message
    pub fn parse(raw: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(raw)
            .map_err(|e| crate::Error::normalize(format!("Unparseable event message: {}", e)))
    }

    /// Event time as a UTC instant
    pub fn occurred_at(&self) -> Result<DateTime<Utc>, crate::Error> {
        DateTime::from_timestamp_millis(self.timestamp).ok_or_else(|| {
            crate::Error::normalize(format!("Timestamp out of range: {}", self.timestamp))
        })
    }

    /// A string detail, if present
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}

/// Converts raw records into typed events
#[async_trait]
pub trait Normalizer: Send + Sync {
    /// Classify `raw`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))`: dispatch this event
    /// - `Ok(None)`: the record is deliberately ignored
    /// - `Err(Error)`: the record could not be understood
    async fn normalize(&self, raw: RawEvent) -> Result<Option<Event>, crate::Error>;
}

/// Looks up the entity an event refers to
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Fetch the virtual machine behind `entity_id`
    ///
    /// `Ok(None)` means the entity no longer exists.
    async fn resolve_vm(&self, entity_id: &str) -> Result<Option<VirtualMachine>, crate::Error>;

    /// Edit link of the account this process authenticates as
    async fn current_user_link(&self) -> Result<String, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_live_message() {
        let raw = RawEvent::parse(
            r#"{"type":"VIRTUAL_MACHINE","action":"DEPLOY_FINISH","timestamp":1700000000000,
                "user":"admin","entityIdentifier":"/cloud/virtualdatacenters/1/virtualappliances/2/virtualmachines/3",
                "details":{"VIRTUAL_MACHINE_NAME":"vm-3"}}"#,
        )
        .unwrap();
        assert_eq!(raw.event_type, "VIRTUAL_MACHINE");
        assert_eq!(raw.action, "DEPLOY_FINISH");
        assert_eq!(raw.detail_str("VIRTUAL_MACHINE_NAME"), Some("vm-3"));
        assert_eq!(raw.occurred_at().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = RawEvent::parse("not json").unwrap_err();
        assert!(matches!(err, crate::Error::Normalize(_)));
    }
}
