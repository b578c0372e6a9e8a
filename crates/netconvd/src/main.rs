// # netconvd - Convergence Daemon
//
// Thin integration layer: reads configuration from environment variables,
// wires registry -> store -> driver -> engine, and serves the item CRUD
// surface over HTTP. All convergence logic lives in netconv-core.
//
// ## Configuration
//
// ### HTTP
// - `NETCONV_BIND`: Listen address (default 127.0.0.1:3001)
//
// ### Templates
// - `NETCONV_APPLY_TEMPLATE`: Path to an apply template (built-in if unset)
// - `NETCONV_REMOVE_TEMPLATE`: Path to a remove template (built-in if unset)
//
// ### Device sessions
// - `NETCONV_READ_DELAY_MS`: Delay before each read of device output
// - `NETCONV_INSECURE_SKIP_HOST_VERIFICATION`: Accept any host key (default true)
// - `NETCONV_CONNECT_TIMEOUT_SECS`: Session establishment timeout (unset waits)
//
// ### Store
// - `NETCONV_STORE_TYPE`: memory, file
// - `NETCONV_STORE_PATH`: Path to the log file (for file store)
// - `NETCONV_SEED`: JSON array of items recorded at startup
//
// ### Engine
// - `NETCONV_COMMIT_POLICY`: record_intent, require_success
// - `NETCONV_SERIALIZE_PER_KEY`: Serialize operations per interface (default true)
//
// ## Example
//
// ```bash
// export NETCONV_STORE_TYPE=file
// export NETCONV_STORE_PATH=/var/lib/netconv/log.json
// export NETCONV_COMMIT_POLICY=require_success
//
// netconvd
// ```

mod http;
mod seed;

use anyhow::{Context, Result};
use netconv_core::config::{
    CommitPolicy, EngineConfig, HttpConfig, NetconvConfig, SessionConfig, StoreConfig,
    TemplateConfig,
};
use netconv_core::{CommandRenderer, ConvergenceEngine, DesiredState, DriverRegistry, EngineEvent};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time allowed for in-flight requests after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum NetconvExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<NetconvExitCode> for ExitCode {
    fn from(code: NetconvExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration as read from the environment
#[derive(Debug, Default)]
struct Config {
    bind: Option<String>,
    apply_template: Option<String>,
    remove_template: Option<String>,
    read_delay_ms: Option<u64>,
    insecure_skip_host_verification: Option<bool>,
    connect_timeout_secs: Option<u64>,
    store_type: String,
    store_path: Option<String>,
    seed: Option<String>,
    commit_policy: String,
    serialize_per_key: Option<bool>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            bind: env::var("NETCONV_BIND").ok(),
            apply_template: env::var("NETCONV_APPLY_TEMPLATE").ok(),
            remove_template: env::var("NETCONV_REMOVE_TEMPLATE").ok(),
            read_delay_ms: parse_env("NETCONV_READ_DELAY_MS")?,
            insecure_skip_host_verification: parse_env("NETCONV_INSECURE_SKIP_HOST_VERIFICATION")?,
            connect_timeout_secs: parse_env("NETCONV_CONNECT_TIMEOUT_SECS")?,
            store_type: env::var("NETCONV_STORE_TYPE").unwrap_or_else(|_| "memory".to_string()),
            store_path: env::var("NETCONV_STORE_PATH").ok(),
            seed: env::var("NETCONV_SEED").ok(),
            commit_policy: env::var("NETCONV_COMMIT_POLICY")
                .unwrap_or_else(|_| "record_intent".to_string()),
            serialize_per_key: parse_env("NETCONV_SERIALIZE_PER_KEY")?,
            log_level: env::var("NETCONV_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks the values only the daemon knows about; the assembled
    /// [`NetconvConfig`] is validated by [`Config::to_netconv_config`].
    fn validate(&self) -> Result<()> {
        match self.store_type.as_str() {
            "memory" => {}
            "file" => match self.store_path.as_deref() {
                None | Some("") => anyhow::bail!(
                    "NETCONV_STORE_PATH is required when NETCONV_STORE_TYPE=file. \
                    Set it via: export NETCONV_STORE_PATH=/var/lib/netconv/log.json"
                ),
                Some(_) => {}
            },
            _ => anyhow::bail!(
                "NETCONV_STORE_TYPE '{}' is not supported. \
                Supported types: memory, file",
                self.store_type
            ),
        }

        match self.commit_policy.as_str() {
            "record_intent" | "require_success" => {}
            _ => anyhow::bail!(
                "NETCONV_COMMIT_POLICY '{}' is not valid. \
                Valid policies: record_intent, require_success",
                self.commit_policy
            ),
        }

        if let Some(bind) = &self.bind {
            bind.parse::<SocketAddr>()
                .with_context(|| format!("NETCONV_BIND '{}' is not a socket address", bind))?;
        }

        for (name, path) in [
            ("NETCONV_APPLY_TEMPLATE", &self.apply_template),
            ("NETCONV_REMOVE_TEMPLATE", &self.remove_template),
            ("NETCONV_SEED", &self.seed),
        ] {
            if path.as_deref() == Some("") {
                anyhow::bail!("{} cannot be empty when set", name);
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NETCONV_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Assemble and validate the library configuration
    fn to_netconv_config(&self) -> Result<NetconvConfig> {
        let mut session = SessionConfig::default();
        if let Some(read_delay_ms) = self.read_delay_ms {
            session.read_delay_ms = read_delay_ms;
        }
        if let Some(skip) = self.insecure_skip_host_verification {
            session.insecure_skip_host_verification = skip;
        }
        session.connect_timeout_secs = self.connect_timeout_secs;

        let store = match (self.store_type.as_str(), &self.store_path) {
            ("file", Some(path)) => StoreConfig::File {
                path: PathBuf::from(path),
            },
            _ => StoreConfig::Memory,
        };

        let commit_policy = match self.commit_policy.as_str() {
            "require_success" => CommitPolicy::RequireSuccess,
            _ => CommitPolicy::RecordIntent,
        };
        let mut engine = EngineConfig {
            commit_policy,
            ..EngineConfig::default()
        };
        if let Some(serialize) = self.serialize_per_key {
            engine.serialize_per_key = serialize;
        }

        let mut http = HttpConfig::default();
        if let Some(bind) = &self.bind {
            http.bind = bind.parse()?;
        }

        let config = NetconvConfig {
            templates: TemplateConfig {
                apply_path: self.apply_template.as_ref().map(PathBuf::from),
                remove_path: self.remove_template.as_ref().map(PathBuf::from),
            },
            session,
            store,
            engine,
            http,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse an optional environment variable, failing on malformed values
fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} '{}' is not valid: {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return NetconvExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return NetconvExitCode::ConfigError.into();
    }

    let netconv_config = match config.to_netconv_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration validation error: {}", e);
            return NetconvExitCode::ConfigError.into();
        }
    };

    let seed = match config.seed.as_deref().map(|p| seed::load(Path::new(p))) {
        Some(Ok(states)) => states,
        Some(Err(e)) => {
            eprintln!("Seed error: {:#}", e);
            return NetconvExitCode::ConfigError.into();
        }
        None => Vec::new(),
    };

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
        return NetconvExitCode::ConfigError.into();
    }

    info!("Starting netconvd daemon");
    info!(
        "Store: {}, commit policy: {:?}, serialize per key: {}",
        netconv_config.store.type_name(),
        netconv_config.engine.commit_policy,
        netconv_config.engine.serialize_per_key
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NetconvExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(netconv_config, seed).await {
            error!("Daemon error: {:#}", e);
            NetconvExitCode::RuntimeError
        } else {
            NetconvExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: NetconvConfig, seed: Vec<DesiredState>) -> Result<()> {
    let registry = DriverRegistry::with_builtin_stores();

    #[cfg(feature = "ssh")]
    {
        info!("Registering SSH session driver");
        netconv_ssh::register(&registry);
    }

    let store = registry.create_store(&config.store).await?;
    let store: Arc<dyn netconv_core::ConvergenceStore> = Arc::from(store);
    seed::apply(store.as_ref(), seed).await?;

    let driver = registry
        .create_driver(&config.session)
        .with_context(|| format!("available drivers: {:?}", registry.list_drivers()))?;
    let renderer = CommandRenderer::load(&config.templates).await?;

    let (engine, mut events) =
        ConvergenceEngine::new(renderer, Arc::from(driver), store, &config.engine)?;
    let engine = Arc::new(engine);

    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Failed { .. } => warn!(?event, "engine event"),
                _ => debug!(?event, "engine event"),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(config.http.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.bind))?;
    info!("Listening on {}", config.http.bind);

    let app = http::build_router(engine.clone());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        signal = wait_for_shutdown() => {
            let signal = signal?;
            info!("Received shutdown signal: {}", signal);
            let _ = stop_tx.send(());
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await {
                Ok(joined) => joined??,
                Err(_) => {
                    warn!("In-flight requests still running after {:?}, abandoning", SHUTDOWN_TIMEOUT);
                    server.abort();
                }
            }
        }
        joined = &mut server => {
            joined??;
            anyhow::bail!("HTTP server stopped unexpectedly");
        }
    }

    info!("Flushing store");
    engine.flush().await?;
    drop(engine);
    event_logger.abort();

    info!("Shutting down daemon");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
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
