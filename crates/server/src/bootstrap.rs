use std::sync::Arc;
use std::time::Duration;

use poflow_core::artifacts::{ArtifactCache, ArtifactTier, MemoryTier, RenderError, TierError};
use poflow_core::config::{AppConfig, ConfigError, LoadOptions};
use poflow_core::delivery::MessageComposer;
use poflow_core::engine::OrderEngine;
use poflow_core::events::{EventBus, ThrottlePolicy};
use poflow_core::notifications::NotificationQueue;
use poflow_db::{
    connect_from_config, migrations, DbPool, SqlArtifactTier, SqlPurchaseOrderRepository,
};
use thiserror::Error;
use tracing::info;

use crate::channels::build_pipeline;
use crate::health::Components;
use crate::remote::HttpArtifactTier;
use crate::render::{DocumentBranding, PdfRenderer};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<OrderEngine>,
    pub notifications: NotificationQueue,
    pub components: Components,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("document renderer could not be prepared: {0}")]
    Renderer(#[source] RenderError),
    #[error("remote artifact store could not be prepared: {0}")]
    RemoteTier(#[source] TierError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let mut tiers: Vec<Arc<dyn ArtifactTier>> = vec![
        Arc::new(MemoryTier::default()),
        Arc::new(SqlArtifactTier::new(db_pool.clone())),
    ];
    if let Some(base_url) = &config.artifacts.remote_base_url {
        let timeout = Duration::from_secs(config.artifacts.remote_timeout_secs);
        let remote = HttpArtifactTier::new(base_url, timeout).map_err(BootstrapError::RemoteTier)?;
        tiers.push(Arc::new(remote));
    }

    let branding = DocumentBranding {
        company_name: config.delivery.company_name.clone(),
        sender_name: config.delivery.sender_name.clone(),
    };
    let renderer = match &config.artifacts.template_dir {
        Some(dir) => PdfRenderer::from_dir(dir, branding),
        None => PdfRenderer::embedded(branding),
    }
    .map_err(BootstrapError::Renderer)?;

    let cache = ArtifactCache::new(tiers, Arc::new(renderer));
    let pipeline = build_pipeline(&config.delivery);
    let components = Components {
        artifact_tiers: cache.tier_names(),
        delivery_channels: pipeline.channel_names(),
    };

    let bus = EventBus::new(
        ThrottlePolicy::from_settings(&config.events),
        Duration::from_millis(config.events.flush_interval_ms),
    );
    let notifications = NotificationQueue::from_settings(&config.notifications);
    bus.subscribe_all(Arc::new(notifications.clone()));
    bus.start();

    let engine = OrderEngine::new(
        Arc::new(SqlPurchaseOrderRepository::new(db_pool.clone())),
        Arc::new(cache),
        Arc::new(pipeline),
        bus,
    )
    .with_composer(MessageComposer {
        sender_name: config.delivery.sender_name.clone(),
        company_name: config.delivery.company_name.clone(),
    })
    .with_default_pricing(config.orders.default_pricing());

    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        artifact_tiers = ?components.artifact_tiers,
        delivery_channels = ?components.delivery_channels,
        "order engine wired"
    );

    Ok(Application { config, db_pool, engine: Arc::new(engine), notifications, components })
}
