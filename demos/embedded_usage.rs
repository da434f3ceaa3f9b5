//! Minimal embedding example for bond-core
//!
//! This example demonstrates using bond-core as a library in a custom
//! application. Every collaborator lives in-process, so no management
//! server is needed: live messages are pushed through a channel and
//! write-back lands in a map.

use async_trait::async_trait;
use bond_core::results::{BackupRestorePair, BackupState, BackupStatus, ResultBatch};
use bond_core::traits::LogStream;
use bond_core::{
    BondConfig, CancelFlag, Collaborators, CommsHandler, Connector, EntityResolver, Event,
    EventKind, EventTranslator, HandlerTable, HistoricalLog, HttpResponse, OutboundClient, Plugin,
    PluginError, RawEvent, ResourceCache, ResourceClient, Result, ResultsSource, Transport,
    VirtualMachine,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const METADATA_LINK: &str = "/cloud/vms/1/metadata";
const SERVICE_ACCOUNT: &str = "/admin/users/bond";

/// Live connector fed by the application
struct ChannelConnector {
    messages: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl ChannelConnector {
    fn new() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                messages: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, handler: Arc<dyn CommsHandler>) -> Result<()> {
        let Some(mut messages) = self.messages.lock().unwrap().take() else {
            return Err(bond_core::Error::transport("Already connected"));
        };
        handler.on_transport_negotiated(Transport::WebSocket);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                handler.on_message(&message).await;
            }
        });
        Ok(())
    }

    async fn disconnect(&self) {
        println!("[Embedded] Disconnected");
    }
}

/// Nothing was missed: this is a first run
struct NoHistory;

impl HistoricalLog for NoHistory {
    fn fetch_since(&self, _since: DateTime<Utc>) -> LogStream {
        Box::pin(tokio_stream::empty())
    }
}

/// Resolves every entity to the same VM
struct SingleVmResolver;

#[async_trait]
impl EntityResolver for SingleVmResolver {
    async fn resolve_vm(&self, _entity_id: &str) -> Result<Option<VirtualMachine>> {
        Ok(Some(
            VirtualMachine::new("web-1", "ON").with_link("metadata", METADATA_LINK),
        ))
    }

    async fn current_user_link(&self) -> Result<String> {
        Ok(SERVICE_ACCOUNT.to_string())
    }
}

/// Remote documents kept in a map
struct InMemoryResources {
    documents: Mutex<HashMap<String, String>>,
}

impl InMemoryResources {
    fn new() -> Self {
        let mut documents = HashMap::new();
        documents.insert(
            METADATA_LINK.to_string(),
            serde_json::json!({ "metadata": { "metadata": { "owner": "ops" } } }).to_string(),
        );
        Self {
            documents: Mutex::new(documents),
        }
    }

    fn document(&self, link: &str) -> Option<String> {
        self.documents.lock().unwrap().get(link).cloned()
    }
}

#[async_trait]
impl ResourceClient for InMemoryResources {
    async fn fetch_entity(&self, link: &str) -> Result<HttpResponse> {
        Ok(match self.document(link) {
            Some(body) => HttpResponse::new(200, body),
            None => HttpResponse::new(404, ""),
        })
    }

    async fn write_entity(&self, link: &str, body: &str) -> Result<HttpResponse> {
        println!("[Embedded] PUT {}", link);
        self.documents
            .lock()
            .unwrap()
            .insert(link.to_string(), body.to_string());
        Ok(HttpResponse::new(200, ""))
    }

    async fn api_version(&self) -> Result<String> {
        Ok(bond_core::config::DEFAULT_API_VERSION.to_string())
    }
}

/// Pretends to back up every VM whose backup configuration changes
struct BackupPlugin {
    handlers: HandlerTable,
    pending: Arc<BackupResults>,
    cancel: CancelFlag,
}

struct BackupResults {
    vms: Mutex<BTreeSet<String>>,
}

impl BackupPlugin {
    fn new() -> std::result::Result<Self, PluginError> {
        let pending = Arc::new(BackupResults {
            vms: Mutex::new(BTreeSet::new()),
        });

        let seen = pending.clone();
        let handlers = HandlerTable::builder()
            .on(EventKind::Backup, move |event: Arc<Event>| {
                let seen = seen.clone();
                async move {
                    let Some(vm) = event.vm_name() else {
                        return Err(PluginError::processing("Backup event without a VM"));
                    };
                    println!("[Backup] Scheduling backup of {}", vm);
                    seen.vms.lock().unwrap().insert(vm.to_string());
                    Ok(())
                }
            })
            .on(EventKind::Deploy, |event: Arc<Event>| async move {
                println!("[Backup] {} deployed", event.vm_name().unwrap_or("?"));
                Ok(())
            })
            .build()?;

        Ok(Self {
            handlers,
            pending,
            cancel: CancelFlag::new(),
        })
    }
}

impl Plugin for BackupPlugin {
    fn name(&self) -> &str {
        "backup"
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

    fn results_source(&self) -> Option<Arc<dyn ResultsSource>> {
        Some(self.pending.clone())
    }
}

#[async_trait]
impl ResultsSource for BackupResults {
    fn name(&self) -> &str {
        "backup"
    }

    async fn poll(&self, entities: &[String]) -> std::result::Result<Vec<ResultBatch>, PluginError> {
        let vms = self.vms.lock().unwrap();
        Ok(entities
            .iter()
            .filter(|name| vms.contains(*name))
            .map(|name| {
                ResultBatch::new(
                    name.clone(),
                    vec![BackupRestorePair::backup(BackupStatus::new(
                        "nightly",
                        BackupState::Done,
                    ))],
                )
            })
            .collect())
    }
}

fn message(action: &str, user: &str, at: DateTime<Utc>) -> String {
    let raw = RawEvent::new("VIRTUAL_MACHINE", action, at, user).with_entity("/cloud/vms/1");
    serde_json::to_string(&raw).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    println!("=== Embedded bond-core Example ===\n");

    // Create custom components
    let (connector, live) = ChannelConnector::new();
    let resources = Arc::new(InMemoryResources::new());
    let cache = Arc::new(ResourceCache::new());
    let collaborators = Collaborators {
        connector: Arc::new(connector),
        normalizer: Arc::new(EventTranslator::new(
            Arc::new(SingleVmResolver),
            cache.clone(),
            SERVICE_ACCOUNT,
        )),
        history: Arc::new(NoHistory),
        resources: resources.clone(),
        cache,
    };

    // Create configuration
    let mut config = BondConfig::new("http://embedded/api", "bond", "embedded");
    config.dispatch.workers = 2;
    config.dispatch.shutdown_timeout_secs = 5;
    config.results.poll_period_secs = 1;

    println!("1. Creating client...");
    let plugin: Arc<dyn Plugin> = Arc::new(BackupPlugin::new()?);
    let (client, mut notifications) = OutboundClient::new(config, vec![plugin], collaborators).await?;

    let notification_listener = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            println!("[Notification] {}", notification);
        }
    });

    println!("2. Starting plugins and connecting...");
    client.start_plugins().await;
    let summary = client.run().await?;
    println!("   Replayed {} missed event(s)", summary.replayed);

    println!("3. Pushing live events...");
    let now = Utc::now();
    let _ = live.send(message("DEPLOY_FINISH", "alice", now));
    let _ = live.send(message(
        "METADATA_MODIFIED",
        "alice",
        now + chrono::Duration::seconds(1),
    ));
    // Written by our own account: dropped by the translator
    let _ = live.send(message(
        "METADATA_MODIFIED",
        "bond",
        now + chrono::Duration::seconds(2),
    ));

    // Let the poller pick up the backup result
    tokio::time::sleep(Duration::from_millis(2500)).await;

    println!("\n4. Closing client...");
    client.close().await;
    notification_listener.abort();

    println!(
        "   Checkpoint: {:?}",
        client.last_processed_timestamp().map(|ts| ts.to_rfc3339())
    );
    println!(
        "   Metadata: {}",
        resources.document(METADATA_LINK).unwrap_or_default()
    );

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- Client lifecycle is fully controlled by the application");
    println!("- Every collaborator is a trait object");
    println!("- Self-generated metadata changes never reach plugins");

    Ok(())
}
