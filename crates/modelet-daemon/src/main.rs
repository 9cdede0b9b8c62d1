//! modelet daemon
//!
//! Agent process that sits next to an inference server and manages which of
//! the models assigned to this replica are held in server memory.

use anyhow::{bail, Context};
use clap::Parser;
use modelet_api::create_router;
use modelet_core::AgentConfig;
use modelet_runtime::{ModelServer, V2Client};
use modelet_state::{CommandHandler, LocalStateManager};
use modelet_store::LocalRepository;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// modelet daemon - model residency agent for V2 inference servers
#[derive(Parser, Debug)]
#[command(name = "modeletd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Inference server host
    #[arg(long)]
    server_host: Option<String>,

    /// Inference server HTTP port
    #[arg(long)]
    server_port: Option<u16>,

    /// Memory available for resident models in bytes
    #[arg(long)]
    memory_bytes: Option<u64>,

    /// Directory the inference server loads models from
    #[arg(long)]
    models_path: Option<PathBuf>,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => AgentConfig::default(),
        };

        if let Some(address) = self.address {
            config.api.address = address;
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(host) = self.server_host {
            config.runtime.host = host;
        }
        if let Some(port) = self.server_port {
            config.runtime.http_port = port;
        }
        if let Some(bytes) = self.memory_bytes {
            config.memory.total_bytes = bytes;
        }
        if let Some(path) = self.models_path {
            config.storage.models_path = path;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(config: &AgentConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level)
            .with_context(|| format!("Invalid log level: {}", config.logging.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.logging.format.eq_ignore_ascii_case("compact") {
        builder.compact().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))
}

/// Wait for the inference server to report live
async fn wait_for_server(server: &dyn ModelServer, timeout: Duration) -> anyhow::Result<()> {
    let started = Instant::now();
    loop {
        match server.live().await {
            Ok(()) => return Ok(()),
            Err(e) if started.elapsed() < timeout => {
                debug!(error = %e, "Inference server not live yet");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => bail!("Inference server not live after {:?}: {}", timeout, e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config)?;

    info!("Starting modelet daemon v{}", env!("CARGO_PKG_VERSION"));

    let server = Arc::new(V2Client::new(
        &config.runtime.host,
        config.runtime.http_port,
        config.runtime.request_timeout_secs,
    )?);
    info!(url = server.base_url(), "Waiting for inference server");
    wait_for_server(
        server.as_ref(),
        Duration::from_secs(config.runtime.startup_timeout_secs),
    )
    .await?;

    let repository = Arc::new(LocalRepository::new(config.storage.models_path.clone()));
    repository.init().await?;

    let state = Arc::new(LocalStateManager::new(
        server,
        config.memory.total_bytes,
        config.memory.overcommit_percentage,
    ));
    let handler = Arc::new(CommandHandler::new(state.clone(), repository));

    let sweep_interval = Duration::from_secs(config.storage.lock_sweep_interval_secs.max(1));
    let sweeper = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                state.trim_locks();
            }
        })
    };

    let router = create_router(handler.clone());

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("Invalid API address")?;

    info!("API server listening on {}", addr);
    info!(
        models_path = %config.storage.models_path.display(),
        memory_bytes = config.memory.total_bytes,
        "Replica ready"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    if let Err(e) = handler.unload_all().await {
        warn!(error = %e, "Failed to unload all models on shutdown");
    }

    info!("modelet daemon stopped");
    Ok(())
}
