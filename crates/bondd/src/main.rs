// # bondd - Bond Daemon
//
// Thin integration layer around bond-core:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Wiring the HTTP collaborators, the stdin connector and the plugins
// 4. Persisting the checkpoint until a shutdown signal arrives
//
// No event handling logic lives here. Everything about dispatch, catch-up
// and write-back is in bond-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Server
// - `BOND_SERVER`: API root of the management server (required)
// - `BOND_USER`: Account for the live stream and write-back (required)
// - `BOND_PASSWORD`: Password of that account (required)
// - `BOND_API_VERSION`: Expected server API version (default: 4.2)
// - `BOND_TRANSPORT`: sse, websocket, streaming or long_polling (default: sse)
//
// ### Processing
// - `BOND_WORKERS`: Plugin tasks running at once, 1-64 (default: 1)
// - `BOND_SHUTDOWN_TIMEOUT_SECS`: Shutdown wait, 1-3600 (default: 300)
// - `BOND_RESULTS_POLL_SECS`: Results poll period, 1-86400 (default: 60)
// - `BOND_PLUGINS`: Comma-separated plugin factories (default: log)
// - `BOND_PRELOAD_CACHE`: Walk the server hierarchy at startup (default: true)
//
// ### Checkpoint
// - `BOND_CHECKPOINT_PATH`: Checkpoint file; unset keeps it in memory
//
// ### Logging
// - `BOND_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export BOND_SERVER=https://m.example.com/api
// export BOND_USER=bond
// export BOND_PASSWORD=secret
// export BOND_CHECKPOINT_PATH=/var/lib/bond/checkpoint.json
//
// relay-events | bondd
// ```

mod log_plugin;
mod stdin;

use anyhow::{Context, Result};
use bond_core::traits::Transport;
use bond_core::{
    BondConfig, CheckpointStore, Collaborators, EventTranslator, FileCheckpointStore,
    MemoryCheckpointStore, OutboundClient, PluginCatalog, PluginConfig, ResourceCache,
};
use bond_http::{ApiConnection, HttpEntityResolver, HttpEventLog, HttpResourceClient};
use std::env;
use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::log_plugin::LoggingPluginFactory;
use crate::stdin::StdinConnector;

/// How often a dirty checkpoint is flushed to its store
const CHECKPOINT_FLUSH_PERIOD: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BondExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl BondExitCode {
    /// Exit code for a daemon failure
    fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<bond_core::Error>() {
            Some(e) if e.is_fatal() => BondExitCode::ConfigError,
            _ => BondExitCode::RuntimeError,
        }
    }
}

impl From<BondExitCode> for ExitCode {
    fn from(code: BondExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    server: String,
    user: String,
    password: String,
    api_version: Option<String>,
    transport: String,
    workers: usize,
    shutdown_timeout_secs: u64,
    results_poll_secs: u64,
    checkpoint_path: Option<String>,
    plugins: Vec<String>,
    preload_cache: bool,
    log_level: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .field("api_version", &self.api_version)
            .field("transport", &self.transport)
            .field("workers", &self.workers)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("results_poll_secs", &self.results_poll_secs)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("plugins", &self.plugins)
            .field("preload_cache", &self.preload_cache)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).with_context(|| format!("{} is required. Set it via: export {}=...", key, key))
        };

        Ok(Self {
            server: required("BOND_SERVER")?,
            user: required("BOND_USER")?,
            password: required("BOND_PASSWORD")?,
            api_version: lookup("BOND_API_VERSION"),
            transport: lookup("BOND_TRANSPORT").unwrap_or_else(|| "sse".to_string()),
            workers: parse_var(&lookup, "BOND_WORKERS", 1)?,
            shutdown_timeout_secs: parse_var(&lookup, "BOND_SHUTDOWN_TIMEOUT_SECS", 300)?,
            results_poll_secs: parse_var(&lookup, "BOND_RESULTS_POLL_SECS", 60)?,
            checkpoint_path: lookup("BOND_CHECKPOINT_PATH"),
            plugins: lookup("BOND_PLUGINS")
                .unwrap_or_else(|| log_plugin::FACTORY_NAME.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            preload_cache: parse_var(&lookup, "BOND_PRELOAD_CACHE", true)?,
            log_level: lookup("BOND_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if !self.server.starts_with("https://") && !self.server.starts_with("http://") {
            anyhow::bail!(
                "BOND_SERVER must use HTTP or HTTPS scheme. Got: {}",
                self.server
            );
        }
        if self.server.starts_with("http://") {
            eprintln!(
                "WARNING: BOND_SERVER uses HTTP (not HTTPS). \
                Credentials are sent with every request."
            );
        }

        if self.user.trim().is_empty() {
            anyhow::bail!("BOND_USER cannot be empty");
        }
        if self.password.is_empty() {
            anyhow::bail!("BOND_PASSWORD cannot be empty");
        }

        if let Err(e) = self.transport.parse::<Transport>() {
            anyhow::bail!("BOND_TRANSPORT is not valid: {}", e);
        }

        if !(1..=64).contains(&self.workers) {
            anyhow::bail!("BOND_WORKERS must be between 1 and 64. Got: {}", self.workers);
        }

        if !(1..=3600).contains(&self.shutdown_timeout_secs) {
            anyhow::bail!(
                "BOND_SHUTDOWN_TIMEOUT_SECS must be between 1 and 3600 seconds. Got: {}",
                self.shutdown_timeout_secs
            );
        }

        if !(1..=86400).contains(&self.results_poll_secs) {
            anyhow::bail!(
                "BOND_RESULTS_POLL_SECS must be between 1 and 86400 seconds. Got: {}",
                self.results_poll_secs
            );
        }

        if self.plugins.is_empty() {
            anyhow::bail!(
                "BOND_PLUGINS must name at least one plugin. \
                Set it via: export BOND_PLUGINS=log"
            );
        }

        if let Some(ref path) = self.checkpoint_path {
            if path.is_empty() {
                anyhow::bail!("BOND_CHECKPOINT_PATH cannot be empty when set");
            }
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "BOND_CHECKPOINT_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "BOND_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Library configuration resuming after `last_processed_event`
    fn to_bond_config(
        &self,
        last_processed_event: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<BondConfig> {
        let mut config = BondConfig::new(&self.server, &self.user, &self.password)
            .with_last_processed_event(last_processed_event);
        if let Some(ref version) = self.api_version {
            config.api_version = version.clone();
        }
        config.transport = self.transport.parse()?;
        config.dispatch.workers = self.workers;
        config.dispatch.shutdown_timeout_secs = self.shutdown_timeout_secs;
        config.results.poll_period_secs = self.results_poll_secs;
        config.plugins = self.plugins.iter().map(PluginConfig::named).collect();
        Ok(config)
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return BondExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return BondExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return BondExitCode::ConfigError.into();
    }

    info!("Starting bondd daemon");
    debug!("Configuration: {:?}", config);

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return BondExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => BondExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                BondExitCode::for_error(&e)
            }
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    // Checkpoint left by the previous run
    let store: Arc<dyn CheckpointStore> = match config.checkpoint_path {
        Some(ref path) => Arc::new(FileCheckpointStore::new(path).await?),
        None => {
            warn!("BOND_CHECKPOINT_PATH not set, the checkpoint will not survive a restart");
            Arc::new(MemoryCheckpointStore::new())
        }
    };
    let resume_from = store.load().await?;
    match resume_from {
        Some(ts) => info!("Resuming after {}", ts.to_rfc3339()),
        None => info!("No checkpoint, starting live"),
    }

    let bond_config = config.to_bond_config(resume_from)?;
    bond_config.validate()?;

    // HTTP collaborators
    let conn = ApiConnection::from_config(&bond_config)?;
    let cache = Arc::new(ResourceCache::new());
    if config.preload_cache {
        match bond_http::preload_cache(&conn, &cache).await {
            Ok(count) => info!("Preloaded {} vm(s)", count),
            Err(e) => warn!("Failed to preload the resource cache: {}", e),
        }
    }

    let resolver = Arc::new(HttpEntityResolver::new(conn.clone()));
    let service_account = {
        use bond_core::EntityResolver;
        resolver.current_user_link().await?
    };
    info!("Writing back as {}", service_account);

    let collaborators = Collaborators {
        connector: Arc::new(StdinConnector::new(bond_config.transport)),
        normalizer: Arc::new(EventTranslator::new(
            resolver,
            cache.clone(),
            service_account,
        )),
        history: Arc::new(HttpEventLog::new(conn.clone())),
        resources: Arc::new(HttpResourceClient::new(conn)),
        cache,
    };

    // Plugins
    let catalog = PluginCatalog::new();
    catalog.register_factory(log_plugin::FACTORY_NAME, Box::new(LoggingPluginFactory));
    info!("Available plugins: {}", catalog.list_factories().join(", "));

    let (plugins, load_errors) = catalog.load_all(&bond_config.plugins);
    for e in &load_errors {
        error!("{}", e);
    }
    if plugins.is_empty() {
        anyhow::bail!(bond_core::Error::config("No plugin could be loaded"));
    }

    let (client, mut notifications) =
        OutboundClient::new(bond_config, plugins, collaborators).await?;
    client.record_load_failures(&load_errors);

    let notification_task = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            warn!("Notification: {}", notification);
        }
    });

    let checkpoint_task = client
        .take_dispatch_reports()
        .map(|reports| tokio::spawn(persist_checkpoints(reports, store.clone())));

    let started = client.start_plugins().await;
    info!("{} of {} plugin(s) started", started, client.plugins().len());
    for failure in client.load_failures() {
        warn!("Plugin unavailable: {}", failure);
    }

    // Catch up, then wait for a shutdown signal
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut received = None;
    tokio::select! {
        result = client.run() => match result {
            Ok(summary) => info!(
                "Live after replaying {} missed event(s) ({} ignored, {} failed, {} buffered)",
                summary.replayed, summary.ignored, summary.failed, summary.drained
            ),
            Err(e) => {
                client.close().await;
                return Err(e.into());
            }
        },
        signal = &mut shutdown => received = Some(signal),
    }
    let signal = match received {
        Some(signal) => signal,
        None => shutdown.await,
    };

    let outcome = match signal {
        Ok(signal) => {
            info!("Received shutdown signal: {}", signal);
            Ok(())
        }
        Err(e) => {
            error!("Shutdown error: {}", e);
            Err(e)
        }
    };

    info!("Shutting down daemon");
    client.close().await;
    if let Some(task) = checkpoint_task {
        task.abort();
    }
    notification_task.abort();

    if let Some(ts) = client.last_processed_timestamp() {
        store.save(ts).await?;
    }
    store.flush().await?;
    info!(
        "Checkpoint saved at {:?}",
        client.last_processed_timestamp().map(|ts| ts.to_rfc3339())
    );

    outcome
}

/// Save every checkpoint move and flush the store periodically
async fn persist_checkpoints(
    mut reports: tokio::sync::mpsc::Receiver<bond_core::engine::DispatchReport>,
    store: Arc<dyn CheckpointStore>,
) {
    let mut flush = tokio::time::interval(CHECKPOINT_FLUSH_PERIOD);
    flush.tick().await;

    loop {
        tokio::select! {
            report = reports.recv() => {
                let Some(report) = report else { break };
                if let Some(ts) = report.checkpoint
                    && let Err(e) = store.save(ts).await
                {
                    warn!("Failed to save checkpoint: {}", e);
                }
            }
            _ = flush.tick() => {
                if let Err(e) = store.flush().await {
                    warn!("Failed to flush checkpoint: {}", e);
                }
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
