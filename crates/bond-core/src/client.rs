//! Outbound client
//!
//! The pipeline context: owns the checkpoint, the dispatcher, the catch-up
//! reconciler and the results handler, and implements the callback surface
//! the live connector drives.
//!
//! ## Lifecycle
//!
//! 1. [`OutboundClient::new`]: validate configuration, check the API version
//! 2. [`OutboundClient::start_plugins`]: one-time plugin startup, result pollers
//! 3. [`OutboundClient::run`]: connect live, replay missed events, go live
//! 4. [`OutboundClient::close`]: cancel plugins, drain running work, disconnect
//!
//! ## Example
//!
//! ```rust,ignore
//! let (client, mut notifications) = OutboundClient::new(config, plugins, collaborators).await?;
//! client.start_plugins().await;
//! client.run().await?;
//! while let Some(n) = notifications.recv().await {
//!     eprintln!("{}", n);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::ResourceCache;
use crate::config::BondConfig;
use crate::engine::{
    BackfillSummary, CatchupReconciler, CatchupState, Checkpoint, DispatchReport, EventDispatcher,
    ShutdownLevel,
};
use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier};
use crate::plugin::Plugin;
use crate::registry::PluginRegistry;
use crate::results::{ResultBatch, ResultsHandler, ResultsWriter};
use crate::traits::{
    CommsHandler, Connector, HistoricalLog, Normalizer, RawEvent, ResourceClient, Transport,
};

/// External collaborators the client consumes
#[derive(Clone)]
pub struct Collaborators {
    /// Live transport
    pub connector: Arc<dyn Connector>,
    /// Raw record → event
    pub normalizer: Arc<dyn Normalizer>,
    /// Historical replay
    pub history: Arc<dyn HistoricalLog>,
    /// Remote entity access
    pub resources: Arc<dyn ResourceClient>,
    /// Entity name → links
    pub cache: Arc<ResourceCache>,
}

/// Event bridge between the management server and the plugins
pub struct OutboundClient {
    config: BondConfig,
    connector: Arc<dyn Connector>,
    normalizer: Arc<dyn Normalizer>,
    history: Arc<dyn HistoricalLog>,
    cache: Arc<ResourceCache>,
    registry: Arc<PluginRegistry>,
    checkpoint: Arc<Checkpoint>,
    dispatcher: Arc<EventDispatcher>,
    reconciler: CatchupReconciler,
    results: ResultsHandler,
    notifier: Notifier,
    reports: Mutex<Option<mpsc::Receiver<DispatchReport>>>,
    negotiated: Mutex<Option<Transport>>,
    failures: Mutex<Vec<String>>,
    connected: AtomicBool,
}

impl OutboundClient {
    /// Create a client
    ///
    /// Fails when the configuration is invalid or the server speaks a
    /// different API version. Returns the client and the notification
    /// receiver the application must drain.
    pub async fn new(
        config: BondConfig,
        plugins: Vec<Arc<dyn Plugin>>,
        collaborators: Collaborators,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Notification>)> {
        config.validate()?;

        let reported = collaborators.resources.api_version().await?;
        if !config.accepts_api_version(&reported) {
            error!(
                "Server API version {} does not match the expected {}",
                reported.trim(),
                config.api_version
            );
            return Err(Error::VersionMismatch {
                expected: config.api_version.clone(),
                actual: reported.trim().to_string(),
            });
        }
        info!("Server API version {} accepted", reported.trim());

        let (notifier, notifications) = Notifier::channel(config.notification_channel_capacity);
        let registry = Arc::new(PluginRegistry::new(plugins));
        let checkpoint = Arc::new(Checkpoint::with_initial(config.last_processed_event));

        let (dispatcher, reports) = EventDispatcher::new(
            registry.clone(),
            checkpoint.clone(),
            notifier.clone(),
            config.dispatch.workers,
            config.dispatch.report_channel_capacity,
        );
        let dispatcher = Arc::new(dispatcher);
        let reconciler = CatchupReconciler::new(dispatcher.clone(), config.last_processed_event);

        let writer = ResultsWriter::new(
            collaborators.cache.clone(),
            collaborators.resources.clone(),
            notifier.clone(),
        );
        let results = ResultsHandler::start(writer, config.results.poll_period());

        let client = Self {
            connector: collaborators.connector,
            normalizer: collaborators.normalizer,
            history: collaborators.history,
            cache: collaborators.cache,
            registry,
            checkpoint,
            dispatcher,
            reconciler,
            results,
            notifier,
            reports: Mutex::new(Some(reports)),
            negotiated: Mutex::new(None),
            failures: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            config,
        };

        Ok((Arc::new(client), notifications))
    }

    /// Run each plugin's startup and start its results poller
    ///
    /// A plugin that fails to start is cancelled and recorded in
    /// [`OutboundClient::load_failures`]. Returns the number of plugins
    /// started.
    pub async fn start_plugins(&self) -> usize {
        let mut started = 0;
        for plugin in self.registry.plugins() {
            if let Err(e) = plugin.startup().await {
                error!("Plugin {} failed to start: {}", plugin.name(), e);
                self.notifier
                    .notify_error(format!("Failed to start plugin {}", plugin.name()), &e);
                self.record_failure(format!("{}: {}", plugin.name(), e));
                plugin.cancel();
                continue;
            }

            if let Some(source) = plugin.results_source() {
                self.results.add_source(source);
            }
            info!("Plugin {} started", plugin.name());
            started += 1;
        }
        started
    }

    /// Connect live and replay missed events
    ///
    /// Returns once the reconciler is live. A connector that fails to
    /// connect is fatal.
    pub async fn run(self: &Arc<Self>) -> Result<BackfillSummary> {
        let handler: Arc<dyn CommsHandler> = self.clone();
        self.connector.connect(handler).await.map_err(|e| {
            error!("Failed to connect to the live event stream: {}", e);
            e
        })?;
        self.connected.store(true, Ordering::SeqCst);
        self.reconciler.mark_live_start(Utc::now());
        info!("Connected to {} ({})", self.config.server, self.config.transport);

        let summary = self
            .reconciler
            .backfill(
                self.history.as_ref(),
                self.normalizer.as_ref(),
                &self.notifier,
            )
            .await;
        Ok(summary)
    }

    /// Stop everything
    ///
    /// Cancels all plugins, lets running tasks finish (bounded by the
    /// configured shutdown timeout), stops result polling and disconnects.
    pub async fn close(&self) {
        info!("Closing outbound client");
        for plugin in self.registry.plugins() {
            plugin.cancel();
        }
        self.dispatcher
            .shutdown_with_timeout(
                ShutdownLevel::AwaitRunningTasks,
                self.config.dispatch.shutdown_timeout(),
            )
            .await;
        self.results.shutdown();
        if self.connected.swap(false, Ordering::SeqCst) {
            self.connector.disconnect().await;
        }
        info!(
            "Outbound client closed at checkpoint {:?}",
            self.checkpoint.get().map(|ts| ts.to_rfc3339())
        );
    }

    /// Timestamp of the most recent fully processed event
    pub fn last_processed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.checkpoint.get()
    }

    /// Transport the server settled on, once known
    pub fn negotiated_transport(&self) -> Option<Transport> {
        *self
            .negotiated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current catch-up state
    pub fn catchup_state(&self) -> CatchupState {
        self.reconciler.state()
    }

    /// Registered plugins
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        self.registry.plugins()
    }

    /// Resource cache shared with the translator
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// Plugins that failed to load or start
    pub fn load_failures(&self) -> Vec<String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record failures that happened before the client existed
    pub fn record_load_failures(&self, errors: &[Error]) {
        for e in errors {
            self.record_failure(e.to_string());
        }
    }

    /// Take the per-event dispatch report receiver
    ///
    /// Only the first call returns `Some`.
    pub fn take_dispatch_reports(&self) -> Option<mpsc::Receiver<DispatchReport>> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Queue a result batch for write-back
    pub fn submit_results(&self, batch: ResultBatch) -> bool {
        self.results.submit(batch)
    }

    /// Whether the live connection is up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn record_failure(&self, failure: String) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }
}

#[async_trait]
impl CommsHandler for OutboundClient {
    async fn on_message(&self, raw: &str) {
        let raw = match RawEvent::parse(raw) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Discarding live message: {}", e);
                self.notifier
                    .notify_error("Failed to parse event message", &e);
                return;
            }
        };

        match self.normalizer.normalize(raw).await {
            Ok(Some(event)) => self.reconciler.admit(event),
            Ok(None) => debug!("Live message ignored by the normalizer"),
            Err(e) => {
                warn!("Failed to translate live event: {}", e);
                self.notifier
                    .notify_error("Exception whilst translating event", &e);
            }
        }
    }

    fn on_headers(&self, headers: &str) {
        debug!("Live connection headers: {}", headers);
    }

    fn on_transport_negotiated(&self, transport: Transport) {
        if transport != self.config.transport {
            warn!(
                "Requested transport {} but the server negotiated {}",
                self.config.transport, transport
            );
        } else {
            info!("Using transport {}", transport);
        }
        *self
            .negotiated
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }
}
