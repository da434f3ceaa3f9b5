// # Stdin Connector
//
// Live connector that reads one JSON event per line from standard input.
// Useful behind a pipe from an SSE/WebSocket relay, and for local testing:
//
// ```bash
// echo '{"type":"USER","action":"CREATE","timestamp":1700000000000}' | bondd
// ```
//
// End of input does not stop the daemon; only a signal does.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bond_core::traits::{CommsHandler, Connector, Transport};
use bond_core::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Line-delimited JSON connector over stdin
pub struct StdinConnector {
    transport: Transport,
    reader: Mutex<Option<JoinHandle<usize>>>,
}

impl StdinConnector {
    /// Create a connector that reports `transport` as negotiated
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            reader: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for StdinConnector {
    async fn connect(&self, handler: Arc<dyn CommsHandler>) -> Result<()> {
        handler.on_headers("source: stdin");
        handler.on_transport_negotiated(self.transport);

        let task = tokio::spawn(pump(BufReader::new(tokio::io::stdin()), handler));
        if let Some(previous) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }
        info!("Reading live events from stdin");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(task) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("Stopped reading stdin");
        }
    }
}

/// Feed every non-empty line of `input` to `handler`
///
/// Returns the number of lines delivered.
async fn pump<R>(input: R, handler: Arc<dyn CommsHandler>) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut delivered = 0;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                handler.on_message(line).await;
                delivered += 1;
            }
            Ok(None) => {
                info!("End of live input after {} message(s)", delivered);
                break;
            }
            Err(e) => {
                warn!("Failed to read live input: {}", e);
                break;
            }
        }
    }
    delivered
}
