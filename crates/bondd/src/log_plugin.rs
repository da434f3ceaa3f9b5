// # Logging Plugin
//
// Built-in plugin that writes every event it receives to the log. Handy to
// check a deployment end to end before real plugins are configured.
//
// ## Configuration
//
// ```json
// { "factory": "log", "config": { "name": "audit", "kinds": ["backup", "restore"] } }
// ```
//
// Without `kinds` every event kind is logged.

use std::sync::Arc;

use bond_core::plugin::HandlerTable;
use bond_core::registry::PluginFactory;
use bond_core::{CancelFlag, Error, Event, EventKind, Plugin, Result};
use serde_json::Value;
use tracing::info;

/// Factory name in the catalog
pub const FACTORY_NAME: &str = "log";

/// Logs each event at info level
pub struct LoggingPlugin {
    name: String,
    handlers: HandlerTable,
    cancel: CancelFlag,
}

impl LoggingPlugin {
    /// Create a plugin logging events of `kinds`
    pub fn new(name: impl Into<String>, kinds: &[EventKind]) -> Result<Self> {
        let name = name.into();
        let mut builder = HandlerTable::builder();
        for kind in kinds {
            let plugin = name.clone();
            builder = builder.on(*kind, move |event: Arc<Event>| {
                let plugin = plugin.clone();
                async move {
                    info!(
                        plugin = %plugin,
                        kind = ?event.kind,
                        action = %event.action,
                        user = %event.user,
                        vm = event.vm_name().unwrap_or("-"),
                        "{}",
                        event.timestamp.to_rfc3339()
                    );
                    Ok(())
                }
            });
        }
        let handlers = builder.build().map_err(|e| Error::plugin(&name, e.to_string()))?;

        Ok(Self {
            name,
            handlers,
            cancel: CancelFlag::new(),
        })
    }
}

impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Builds [`LoggingPlugin`]s from configuration
pub struct LoggingPluginFactory;

impl PluginFactory for LoggingPluginFactory {
    fn create(&self, config: &Value) -> Result<Arc<dyn Plugin>> {
        let name = config
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(FACTORY_NAME);

        let kinds: Vec<EventKind> = match config.get("kinds") {
            None | Some(Value::Null) => EventKind::ALL.to_vec(),
            Some(kinds) => serde_json::from_value(kinds.clone())
                .map_err(|e| Error::plugin(name, format!("Invalid 'kinds': {}", e)))?,
        };
        if kinds.is_empty() {
            return Err(Error::plugin(name, "'kinds' cannot be empty"));
        }

        Ok(Arc::new(LoggingPlugin::new(name, &kinds)?))
    }
}
