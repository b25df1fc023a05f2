//! Sidecache daemon.
//!
//! Runs the offline caching agent as a long-lived process: installs and
//! activates the current cache generation, serves the JSON-lines control
//! socket, watches connectivity to replay parked mutations, and runs the
//! daily maintenance pass.

mod server;
mod triggers;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sidecache_core::{Agent, AgentConfig, DiskBackend, HttpFetcher, LogSink};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily-rolling file under the cache directory.
/// The returned guard flushes the file writer on drop and must live as long
/// as the process.
fn init_tracing() -> Result<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = AgentConfig::cache_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "sidecache.log"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing()?;
    let config = AgentConfig::load()?;
    info!(origin = %config.app_origin, version = %config.cache_version, "Sidecache agent starting");

    let backend = Arc::new(DiskBackend::new(AgentConfig::cache_dir()?.join("stores"))?);
    let fetcher = Arc::new(HttpFetcher::new()?);
    let agent = Arc::new(Agent::new(config, backend, fetcher, Arc::new(LogSink)));

    let report = agent.lifecycle().install().await;
    info!(
        cached = report.cached.len(),
        failed = report.failed.len(),
        "Precache installed"
    );
    agent.lifecycle().activate();

    // The daemon has no windowing of its own; surface-open requests from
    // notifications are logged for the host to act on.
    if let Some(mut opens) = agent.hub().take_open_requests() {
        tokio::spawn(async move {
            while let Some(url) = opens.recv().await {
                info!(url = %url, "No surface to focus, open requested");
            }
        });
    }

    let server = tokio::spawn({
        let agent = Arc::clone(&agent);
        async move {
            if let Err(e) = server::run(agent).await {
                error!(error = %e, "Control endpoint failed");
            }
        }
    });
    let connectivity = tokio::spawn({
        let agent = Arc::clone(&agent);
        async move {
            if let Err(e) = triggers::watch_connectivity(agent).await {
                error!(error = %e, "Connectivity watcher failed");
            }
        }
    });
    let maintenance = tokio::spawn(triggers::run_maintenance_schedule(Arc::clone(&agent)));

    tokio::signal::ctrl_c().await?;
    info!("Sidecache agent shutting down");
    server.abort();
    connectivity.abort();
    maintenance.abort();
    Ok(())
}
