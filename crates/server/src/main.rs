// crates/server/src/main.rs
//! Sensorhub server binary.
//!
//! Loads every persisted job before accepting requests, then serves the API
//! until SIGINT or SIGTERM. The persistence retry worker gets a final pass
//! after the server has drained.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sensorhub_core::JobStore;
use sensorhub_server::shutdown::install_shutdown_handler;
use sensorhub_server::{create_app, init_metrics, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sensorhub", version, about = "Job dispatch hub for remote sensor nodes")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and SENSORHUB_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding job records and result streams.
    #[arg(long)]
    job_dir: Option<PathBuf>,

    /// Milliseconds between retries of failed job writes.
    #[arg(long)]
    retry_failure_interval_ms: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(job_dir) = self.job_dir {
            config.store.job_dir = job_dir;
        }
        if let Some(ms) = self.retry_failure_interval_ms {
            config.store.retry_failure_interval_ms = ms;
        }
        config.store.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,sensorhub_core=info,sensorhub_server=info".into()),
        )
        .init();

    init_metrics();

    let config = Cli::parse().into_config()?;
    tracing::info!(
        job_dir = %config.store.job_dir.display(),
        retry_interval_ms = config.store.retry_failure_interval_ms,
        "Opening job store"
    );

    let store = Arc::new(
        JobStore::open(&config.store)
            .await
            .with_context(|| format!("failed to open job store at {}", config.store.job_dir.display()))?,
    );

    let shutdown = install_shutdown_handler();
    let retry_worker = store.spawn_retry_worker(shutdown.clone());

    let app = create_app(Arc::clone(&store));
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    eprintln!("\n  sensorhub v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  Listening on http://{addr}\n");
    tracing::info!(%addr, "Server started");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(e) = retry_worker.await {
        tracing::error!(error = %e, "Retry worker panicked");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
