use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use repack_builder::config::ServiceConfig;
use repack_builder::coordinator::BuildCoordinator;
use repack_builder::{preflight, server};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repack_builder=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let config = Arc::new(ServiceConfig::load().context("loading configuration")?);
    preflight::run(&config).context("running preflight checks")?;

    let coordinator = Arc::new(BuildCoordinator::from_config(Arc::clone(&config)));
    let store = Arc::clone(coordinator.store());
    let sweeper = server::spawn_sweeper(Arc::clone(&store), config.sweep_interval);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        op = "server.listening",
        addr = %addr,
        output_dir = %config.output_dir.display(),
        artifact_ttl_secs = config.artifact_ttl.as_secs(),
        "Repack builder listening"
    );

    axum::serve(listener, server::router(coordinator))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!(op = "server.shutdown", "Shutting down");
        })
        .await
        .context("serving HTTP")?;

    sweeper.abort();
    let removed = store.purge();
    info!(op = "server.stopped", removed, "Artifacts purged on shutdown");
    Ok(())
}
