use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use landcost_core::config::{AppConfig, LoadOptions};
use landcost_server::{bootstrap, logging};
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    logging::init(&config.logging);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let router = landcost_server::router(&app);
    let server = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(async move { signal.notified().await }).await
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "landcost-server listening"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(event_name = "system.server.stopping", correlation_id = "shutdown", "draining in-flight turns");
    shutdown.notify_one();

    match tokio::time::timeout(grace, server).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight requests did not finish before the shutdown deadline"
        ),
    }

    app.db_pool.close().await;
    Ok(())
}
