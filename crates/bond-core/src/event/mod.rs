//! Event model
//!
//! Typed events produced by a [`crate::Normalizer`] and the outcomes
//! plugins report for them.

mod translate;

pub use translate::EventTranslator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::traits::normalizer::RawEvent;

/// Detail key carrying the VM name on undeploy events
pub const VIRTUAL_MACHINE_NAME: &str = "VIRTUAL_MACHINE_NAME";

/// Concrete event type, used to route events to plugin handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Any event that is not about a virtual machine
    Generic,
    /// A virtual machine event with no more specific kind
    VirtualMachine,
    /// A virtual machine finished deploying
    Deploy,
    /// A virtual machine finished undeploying
    Undeploy,
    /// A restore of a virtual machine backup was requested
    Restore,
    /// The backup configuration of a virtual machine changed
    Backup,
}

impl EventKind {
    /// All kinds, in declaration order
    pub const ALL: [EventKind; 6] = [
        EventKind::Generic,
        EventKind::VirtualMachine,
        EventKind::Deploy,
        EventKind::Undeploy,
        EventKind::Restore,
        EventKind::Backup,
    ];
}

/// Virtual machine details attached to VM events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    /// VM name, unique within the server
    pub name: String,
    /// Lifecycle state (`ON`, `OFF`, `NOT_ALLOCATED`, ...)
    pub state: String,
    /// Link relation → href
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    /// Metadata document as last seen
    #[serde(default)]
    pub metadata: Value,
}

impl VirtualMachine {
    /// Create a VM with no links or metadata
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            links: BTreeMap::new(),
            metadata: Value::Null,
        }
    }

    /// Add a link
    pub fn with_link(mut self, rel: impl Into<String>, href: impl Into<String>) -> Self {
        self.links.insert(rel.into(), href.into());
        self
    }

    /// Href of the link with relation `rel`
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links.get(rel).map(String::as_str)
    }

    /// Whether the VM currently has resources allocated
    pub fn is_allocated(&self) -> bool {
        !self.state.eq_ignore_ascii_case("NOT_ALLOCATED")
    }
}

/// A normalized event
///
/// Events are shared between plugin tasks behind an [`Arc`] and never
/// mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Concrete kind
    pub kind: EventKind,
    /// Logical entity type string
    pub event_type: String,
    /// Action string
    pub action: String,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Acting user
    pub user: String,
    /// Entity identifier, if any
    pub entity_id: Option<String>,
    /// Resolved VM, for VM kinds
    pub vm: Option<VirtualMachine>,
    /// Originating record
    pub record: Value,
}

impl Event {
    /// Build an event from a raw record
    pub fn from_raw(
        kind: EventKind,
        raw: &RawEvent,
        vm: Option<VirtualMachine>,
    ) -> Result<Self, crate::Error> {
        Ok(Self {
            kind,
            event_type: raw.event_type.clone(),
            action: raw.action.clone(),
            timestamp: raw.occurred_at()?,
            user: raw.user.clone(),
            entity_id: raw.entity_identifier.clone(),
            vm,
            record: serde_json::to_value(raw)?,
        })
    }

    /// A generic event with the given timestamp, mostly useful in tests
    pub fn generic(event_type: impl Into<String>, action: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::Generic,
            event_type: event_type.into(),
            action: action.into(),
            timestamp: ts,
            user: String::new(),
            entity_id: None,
            vm: None,
            record: Value::Null,
        }
    }

    /// Same event with a different kind
    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    /// Name of the VM this event concerns
    pub fn vm_name(&self) -> Option<&str> {
        self.vm.as_ref().map(|vm| vm.name.as_str()).or_else(|| {
            self.record
                .get("details")
                .and_then(|d| d.get(VIRTUAL_MACHINE_NAME))
                .and_then(Value::as_str)
        })
    }

    /// Total order: timestamp, then kind, entity id and action
    pub(crate) fn chronological(&self, other: &Event) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.entity_id.cmp(&other.entity_id))
            .then_with(|| self.action.cmp(&other.action))
    }
}

/// How a plugin settled an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    /// The handler succeeded
    Complete,
    /// The handler returned an error
    Failed,
    /// The plugin has no handler for the event's kind
    Unsupported,
}

/// Result of one plugin processing one event
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// Plugin name
    pub plugin: String,
    /// The event the plugin processed
    pub event: Arc<Event>,
    /// Settlement state
    pub state: OutcomeState,
    /// Error detail for `Failed`
    pub detail: Option<String>,
}

impl EventOutcome {
    /// A successful outcome
    pub fn complete(plugin: impl Into<String>, event: Arc<Event>) -> Self {
        Self {
            plugin: plugin.into(),
            event,
            state: OutcomeState::Complete,
            detail: None,
        }
    }

    /// A failed outcome carrying the error detail
    pub fn failed(plugin: impl Into<String>, event: Arc<Event>, detail: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            event,
            state: OutcomeState::Failed,
            detail: Some(detail.into()),
        }
    }

    /// The plugin declared no handler for the event
    pub fn unsupported(plugin: impl Into<String>, event: Arc<Event>) -> Self {
        Self {
            plugin: plugin.into(),
            event,
            state: OutcomeState::Unsupported,
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_chronological_order() {
        let a = Event::generic("USER", "CREATE", at(10));
        let b = Event::generic("USER", "CREATE", at(20));
        assert_eq!(a.chronological(&b), Ordering::Less);

        let deploy = Event::generic("VIRTUAL_MACHINE", "DEPLOY_FINISH", at(10))
            .with_kind(EventKind::Deploy);
        assert_eq!(a.chronological(&deploy), Ordering::Less);
        assert_eq!(deploy.chronological(&deploy.clone()), Ordering::Equal);
    }

    #[test]
    fn test_from_raw_keeps_record() {
        let raw = RawEvent::new("VIRTUAL_MACHINE", "UNDEPLOY_FINISH", at(5), "admin")
            .with_detail(VIRTUAL_MACHINE_NAME, "vm-7");
        let event = Event::from_raw(EventKind::Undeploy, &raw, None).unwrap();
        assert_eq!(event.timestamp, at(5));
        assert_eq!(event.vm_name(), Some("vm-7"));
        assert_eq!(event.record["action"], "UNDEPLOY_FINISH");
    }

    #[test]
    fn test_vm_allocation_state() {
        assert!(VirtualMachine::new("a", "ON").is_allocated());
        assert!(!VirtualMachine::new("a", "not_allocated").is_allocated());
    }
}
