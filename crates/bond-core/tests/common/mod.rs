//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal test doubles that verify architectural
//! constraints without talking to a real management server.

#![allow(dead_code)]

use async_trait::async_trait;
use bond_core::error::Result;
use bond_core::event::{Event, EventKind, VirtualMachine};
use bond_core::plugin::{CancelFlag, HandlerTable, Plugin, PluginError};
use bond_core::results::{ResultBatch, ResultsSource};
use bond_core::traits::{
    CommsHandler, Connector, EntityResolver, HistoricalLog, HttpResponse, LogStream, Normalizer,
    RawEvent, ResourceClient,
};
use bond_core::{BondConfig, Checkpoint, Error};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Seconds since the epoch as a UTC instant
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// A generic event at `secs`
pub fn event_at(secs: i64, action: &str) -> Event {
    Event::generic("USER", action, at(secs))
}

/// A raw record at `secs`
pub fn raw_at(secs: i64, action: &str) -> RawEvent {
    RawEvent::new("USER", action, at(secs), "alice")
}

/// Minimal valid configuration
pub fn minimal_config() -> BondConfig {
    BondConfig::new("http://m.test", "bond", "secret")
}

/// One processed event as seen by a plugin
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub plugin: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    /// Checkpoint value while the handler ran (if observed)
    pub checkpoint: Option<DateTime<Utc>>,
}

/// Shared log of processed events, across plugins
pub type SeenLog = Arc<Mutex<Vec<Seen>>>;

pub fn seen_log() -> SeenLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// What a recording plugin does with each event
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Sleep, then succeed
    Delay(Duration),
    /// Sleep for `base - timestamp_secs * step` ms, then succeed
    InverseDelay { base_ms: u64, step_ms: u64 },
}

/// A plugin that records every event it handles
pub struct RecordingPlugin {
    name: String,
    handlers: HandlerTable,
    cancel: CancelFlag,
    calls: Arc<AtomicUsize>,
    startup_fails: bool,
    source: Option<Arc<dyn ResultsSource>>,
}

impl RecordingPlugin {
    /// Create a plugin handling `kinds`
    pub fn new(
        name: &str,
        kinds: &[EventKind],
        behavior: Behavior,
        log: SeenLog,
        checkpoint: Option<Arc<Checkpoint>>,
    ) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = HandlerTable::builder();

        for kind in kinds {
            let name = name.to_string();
            let log = log.clone();
            let calls = calls.clone();
            let checkpoint = checkpoint.clone();
            builder = builder.on(*kind, move |event: Arc<Event>| {
                let name = name.clone();
                let log = log.clone();
                let calls = calls.clone();
                let checkpoint = checkpoint.clone();
                async move {
                    match behavior {
                        Behavior::Delay(d) => tokio::time::sleep(d).await,
                        Behavior::InverseDelay { base_ms, step_ms } => {
                            let secs = event.timestamp.timestamp().max(0) as u64;
                            let ms = base_ms.saturating_sub(secs * step_ms);
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                        }
                        Behavior::Succeed | Behavior::Fail => {}
                    }
                    calls.fetch_add(1, Ordering::SeqCst);
                    log.lock().unwrap().push(Seen {
                        plugin: name,
                        action: event.action.clone(),
                        timestamp: event.timestamp,
                        checkpoint: checkpoint.and_then(|c| c.get()),
                    });
                    match behavior {
                        Behavior::Fail => Err(PluginError::processing("backend rejected event")),
                        _ => Ok(()),
                    }
                }
            });
        }

        Self {
            name: name.to_string(),
            handlers: builder.build().expect("unique kinds"),
            cancel: CancelFlag::new(),
            calls,
            startup_fails: false,
            source: None,
        }
    }

    /// Make `startup` fail
    pub fn failing_startup(mut self) -> Self {
        self.startup_fails = true;
        self
    }

    /// Expose a results source
    pub fn with_results(mut self, source: Arc<dyn ResultsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Handler invocation counter
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    async fn startup(&self) -> std::result::Result<(), PluginError> {
        if self.startup_fails {
            Err(PluginError::startup("backend unreachable"))
        } else {
            Ok(())
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn results_source(&self) -> Option<Arc<dyn ResultsSource>> {
        self.source.clone()
    }
}

/// A historical log fed by the test
///
/// Entries pushed through the returned sender are streamed in order; the
/// replay ends when the sender is dropped.
pub struct ScriptedLog {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<RawEvent>>>>,
    fetch_calls: Arc<AtomicUsize>,
    last_since: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl ScriptedLog {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<RawEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Self {
            rx: Mutex::new(Some(rx)),
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            last_since: Arc::new(Mutex::new(None)),
        };
        (log, tx)
    }

    /// A log holding exactly `entries`
    pub fn fixed(entries: Vec<RawEvent>) -> Self {
        let (log, tx) = Self::new();
        for entry in entries {
            tx.send(Ok(entry)).unwrap();
        }
        log
    }

    pub fn fetch_calls(&self) -> Arc<AtomicUsize> {
        self.fetch_calls.clone()
    }

    pub fn last_since(&self) -> Option<DateTime<Utc>> {
        *self.last_since.lock().unwrap()
    }
}

impl HistoricalLog for ScriptedLog {
    fn fetch_since(&self, since: DateTime<Utc>) -> LogStream {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock().unwrap() = Some(since);
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("fetch_since() called more than once");
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// Maps every raw record to a generic event
///
/// Actions `IGNORE` and `BROKEN` produce `None` and an error.
pub struct PassthroughNormalizer;

#[async_trait]
impl Normalizer for PassthroughNormalizer {
    async fn normalize(&self, raw: RawEvent) -> Result<Option<Event>> {
        match raw.action.as_str() {
            "IGNORE" => Ok(None),
            "BROKEN" => Err(Error::normalize("unknown event layout")),
            _ => Event::from_raw(EventKind::Generic, &raw, None).map(Some),
        }
    }
}

/// Resolves VMs from a fixed table
pub struct StaticResolver {
    vms: HashMap<String, VirtualMachine>,
    user_link: String,
}

impl StaticResolver {
    pub fn new(user_link: &str) -> Self {
        Self {
            vms: HashMap::new(),
            user_link: user_link.to_string(),
        }
    }

    pub fn with_vm(mut self, id: &str, vm: VirtualMachine) -> Self {
        self.vms.insert(id.to_string(), vm);
        self
    }
}

#[async_trait]
impl EntityResolver for StaticResolver {
    async fn resolve_vm(&self, entity_id: &str) -> Result<Option<VirtualMachine>> {
        Ok(self.vms.get(entity_id).cloned())
    }

    async fn current_user_link(&self) -> Result<String> {
        Ok(self.user_link.clone())
    }
}

/// In-memory resource server
///
/// Successful writes replace the stored document, so a later fetch sees
/// what was written.
pub struct MockResourceClient {
    documents: Arc<Mutex<HashMap<String, HttpResponse>>>,
    write_status: u16,
    write_error_body: String,
    version: String,
    fetch_calls: Arc<AtomicUsize>,
    write_calls: Arc<AtomicUsize>,
    written: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockResourceClient {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(Mutex::new(HashMap::new())),
            write_status: 200,
            write_error_body: String::new(),
            version: bond_core::config::DEFAULT_API_VERSION.to_string(),
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            write_calls: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve `body` with `status` at `link`
    pub fn with_document(self, link: &str, status: u16, body: &str) -> Self {
        self.documents
            .lock()
            .unwrap()
            .insert(link.to_string(), HttpResponse::new(status, body));
        self
    }

    /// Answer every write with `status` and `body`
    pub fn failing_writes(mut self, status: u16, body: &str) -> Self {
        self.write_status = status;
        self.write_error_body = body.to_string();
        self
    }

    /// Report `version` as the API version
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn fetch_calls(&self) -> Arc<AtomicUsize> {
        self.fetch_calls.clone()
    }

    pub fn write_calls(&self) -> Arc<AtomicUsize> {
        self.write_calls.clone()
    }

    pub fn written(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        self.written.clone()
    }
}

#[async_trait]
impl ResourceClient for MockResourceClient {
    async fn fetch_entity(&self, link: &str) -> Result<HttpResponse> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(link)
            .cloned()
            .unwrap_or_else(|| HttpResponse::new(404, "")))
    }

    async fn write_entity(&self, link: &str, body: &str) -> Result<HttpResponse> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.written
            .lock()
            .unwrap()
            .push((link.to_string(), body.to_string()));

        if !(200..300).contains(&self.write_status) {
            return Ok(HttpResponse::new(
                self.write_status,
                self.write_error_body.clone(),
            ));
        }
        self.documents
            .lock()
            .unwrap()
            .insert(link.to_string(), HttpResponse::new(200, body));
        Ok(HttpResponse::new(self.write_status, ""))
    }

    async fn api_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }
}

/// A connector the test drives by hand
#[derive(Default)]
pub struct MockConnector {
    handler: Mutex<Option<Arc<dyn CommsHandler>>>,
    fail: bool,
    connects: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose `connect` fails
    pub fn refusing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// The handler passed to `connect`
    pub fn handler(&self) -> Arc<dyn CommsHandler> {
        self.handler
            .lock()
            .unwrap()
            .clone()
            .expect("connect() was called")
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> Arc<AtomicUsize> {
        self.disconnects.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, handler: Arc<dyn CommsHandler>) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::transport("connection refused"));
        }
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// A results source returning the same batches on every poll
pub struct FixedResults {
    batches: Vec<ResultBatch>,
    polls: Arc<AtomicUsize>,
    seen_entities: Arc<Mutex<Vec<String>>>,
}

impl FixedResults {
    pub fn new(batches: Vec<ResultBatch>) -> Self {
        Self {
            batches,
            polls: Arc::new(AtomicUsize::new(0)),
            seen_entities: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn polls(&self) -> Arc<AtomicUsize> {
        self.polls.clone()
    }

    pub fn seen_entities(&self) -> Arc<Mutex<Vec<String>>> {
        self.seen_entities.clone()
    }
}

#[async_trait]
impl ResultsSource for FixedResults {
    fn name(&self) -> &str {
        "fixed-results"
    }

    async fn poll(&self, entities: &[String]) -> std::result::Result<Vec<ResultBatch>, PluginError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        *self.seen_entities.lock().unwrap() = entities.to_vec();
        Ok(self.batches.clone())
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A dispatcher over `plugins` with a fresh checkpoint
pub fn dispatcher(
    plugins: Vec<Arc<dyn Plugin>>,
    workers: usize,
    checkpoint: Arc<Checkpoint>,
) -> (
    Arc<bond_core::EventDispatcher>,
    mpsc::Receiver<bond_core::engine::DispatchReport>,
) {
    let (dispatcher, reports) = bond_core::EventDispatcher::new(
        Arc::new(bond_core::PluginRegistry::new(plugins)),
        checkpoint,
        bond_core::Notifier::disabled(),
        workers,
        64,
    );
    (Arc::new(dispatcher), reports)
}

/// Collaborators around a mock connector and resource client
pub fn collaborators(
    connector: Arc<MockConnector>,
    normalizer: Arc<dyn Normalizer>,
    history: Arc<dyn HistoricalLog>,
    resources: Arc<MockResourceClient>,
) -> bond_core::Collaborators {
    bond_core::Collaborators {
        connector,
        normalizer,
        history,
        resources,
        cache: Arc::new(bond_core::ResourceCache::new()),
    }
}
