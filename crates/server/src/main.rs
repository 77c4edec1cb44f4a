//! offcache server entry point.
//!
//! Boots the offline cache worker, installs the configured generation, and
//! serves the worker's lifecycle events as MCP tools on stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use offcache_core::AppConfig;
use offcache_worker::OfflineWorker;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod scheduler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        generation = %config.generation_id(),
        db = %config.db_path.display(),
        origin = %config.origin,
        "Starting offcache server on stdio transport"
    );

    let worker = Arc::new(OfflineWorker::start(config).await?);

    match worker.on_install().await {
        Ok(outcome) => tracing::info!(
            generation = %outcome.install.generation_id,
            entries = outcome.install.entries,
            activated = outcome.activation.is_some(),
            "install finished"
        ),
        Err(e) => tracing::warn!(error = %e, "install failed; serving the previous generation"),
    }

    let scheduler = worker
        .config()
        .update_interval()
        .map(|period| scheduler::spawn_periodic_update(Arc::clone(&worker), period));

    let handler = handler::OfflineCacheServer::new(Arc::clone(&worker));
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    worker.shutdown().await?;

    Ok(())
}
