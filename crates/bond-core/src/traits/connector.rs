// # Connector Trait
//
// Defines the live transport and the callback surface it drives.
//
// ## Implementations
//
// - Stdin line connector: `bondd` crate
// - Test doubles: `tests/common`
//
// The connector owns the wire. It negotiates a transport with the server,
// then pushes every raw text frame into [`CommsHandler::on_message`] from
// its own task. The handler never calls back into the connector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Live transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Server-sent events
    #[default]
    Sse,
    /// WebSocket
    #[serde(rename = "websocket")]
    WebSocket,
    /// HTTP streaming
    Streaming,
    /// Long polling
    LongPolling,
}

impl Transport {
    /// Wire name of the transport
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Sse => "sse",
            Transport::WebSocket => "websocket",
            Transport::Streaming => "streaming",
            Transport::LongPolling => "long_polling",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sse" => Ok(Transport::Sse),
            "websocket" => Ok(Transport::WebSocket),
            "streaming" => Ok(Transport::Streaming),
            "long_polling" => Ok(Transport::LongPolling),
            other => Err(crate::Error::config(format!(
                "Unknown transport '{}': expected sse, websocket, streaming or long_polling",
                other
            ))),
        }
    }
}

/// Inbound callbacks invoked by a [`Connector`]
///
/// Implementations must return quickly: `on_message` may await the
/// normalizer's enrichment lookups, but never plugin work.
#[async_trait]
pub trait CommsHandler: Send + Sync {
    /// A raw text message arrived on the live stream
    async fn on_message(&self, raw: &str);

    /// Connection headers were received
    fn on_headers(&self, headers: &str);

    /// The server settled on a transport
    fn on_transport_negotiated(&self, transport: Transport);
}

/// Trait for live transport implementations
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Own sockets and spawn one reader task per connection
/// - ✅ Reconnect transparently after transient failures
///
/// ## Forbidden Capabilities
/// - ❌ Parse or classify messages (use `Normalizer`)
/// - ❌ Dispatch to plugins (owned by `OutboundClient`)
/// - ❌ Touch the checkpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the live connection and start delivering to `handler`
    ///
    /// Returns once the connection is established. An error here is fatal
    /// for startup.
    async fn connect(&self, handler: Arc<dyn CommsHandler>) -> Result<(), crate::Error>;

    /// Close the live connection
    async fn disconnect(&self);
}
