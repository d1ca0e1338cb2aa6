mod bootstrap;
mod channels;
mod health;
mod remote;
mod render;

use std::time::Duration;

use anyhow::Result;
use poflow_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use poflow_core::config::LogFormat::*;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        app.components.clone(),
    )
    .await?;

    let pending = app.engine.list_pending().await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        pending_orders = pending.len(),
        "poflow-server started"
    );

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "poflow-server stopping"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.engine.wait_for_side_effects()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.side_effects_abandoned",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "vendor notifications still running at shutdown deadline"
        );
    }
    app.engine.bus().shutdown().await;
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        unread_notifications = app.notifications.unread_count(),
        "poflow-server stopped"
    );
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
