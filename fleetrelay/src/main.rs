mod server;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use fleetrelay_api::{http::BrokerAuthorizer, AppState};
use fleetrelay_cluster::{AdminBatcher, ClusterConfig, ClusterManager, RelayEngine};
use fleetrelay_core::{
    bootstrap::{init_database, init_presence, load_config},
    logging,
    models::RuntimeConfig,
    repository::{DeviceStore, PgCommandStore, PgDeviceStore, PgRuntimeConfigSource},
    service::{CommandService, JwtService, RuntimeConfigCell},
    EventSink,
};
use fleetrelay_ingest::{AltSourceListener, ConfigSync, DeviceSignals, FirebaseSource, StaleSweeper};

use server::{Components, FleetRelayServer};

/// Generate a unique node ID for this server instance
fn generate_node_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{hostname}-{}", nanoid::nanoid!(6))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load and validate configuration
    let config = load_config()?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("fleetrelay starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Initialize database and run migrations
    let pool = init_database(&config).await?;
    info!("Running database migrations...");
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            anyhow::anyhow!("Migration failed: {e}")
        })?;
    info!("Migrations completed");

    // 4. Presence index, purged so no stale online flags survive a restart
    let presence = init_presence(&config).await?;

    // 5. Runtime config snapshot; defaults until the first sync
    let runtime = Arc::new(RuntimeConfigCell::new(RuntimeConfig::default()));

    // 6. Cluster transport and relay engine
    let node_id = generate_node_id();
    let cluster = Arc::new(ClusterManager::new(ClusterConfig {
        redis_url: config.redis.url.clone(),
        node_id,
        dedup_window: Duration::from_secs(config.relay.dedup_window_seconds),
        cleanup_interval: Duration::from_secs(config.relay.dedup_cleanup_seconds),
    })?);
    let batcher = Arc::new(AdminBatcher::new(
        cluster.clone(),
        Duration::from_millis(config.relay.batch_flush_ms),
    ));
    let relay: Arc<dyn EventSink> = Arc::new(RelayEngine::new(
        cluster.clone(),
        batcher.clone(),
        runtime.handle(),
    ));
    info!(node_id = %cluster.node_id(), "Relay engine initialized");

    // 7. Stores and services
    let devices: Arc<dyn DeviceStore> = Arc::new(PgDeviceStore::new(pool.clone()));
    let signals = Arc::new(DeviceSignals::new(presence.clone(), devices.clone(), relay.clone()));
    let commands = Arc::new(CommandService::new(
        Arc::new(PgCommandStore::new(pool.clone())),
        relay.clone(),
    ));

    // 8. Alternate source listener, toggled at runtime by config sync
    let alt_listener = if config.alt_source.base_url.is_empty() {
        info!("Alternate source not configured");
        None
    } else {
        let source = FirebaseSource::new(
            &config.alt_source.base_url,
            config.alt_source.auth_token.clone(),
            Duration::from_secs(config.alt_source.request_timeout_seconds),
        )?
        .with_idle_timeout(Duration::from_secs(config.alt_source.idle_timeout_seconds));
        Some(Arc::new(AltSourceListener::new(
            Arc::new(source),
            signals.clone(),
            Duration::from_secs(config.alt_source.reconnect_delay_seconds),
        )))
    };

    // 9. Periodic routines
    let mut config_sync = ConfigSync::new(
        Arc::new(PgRuntimeConfigSource::new(pool.clone())),
        runtime.clone(),
        config.config_sync.record_key.clone(),
        config.relay.force_high_scale,
        Duration::from_secs(config.config_sync.interval_seconds),
    );
    if let Some(listener) = &alt_listener {
        config_sync = config_sync.with_alt_listener(listener.clone());
    }
    let sweeper = Arc::new(StaleSweeper::new(
        devices,
        presence.clone(),
        relay.clone(),
        runtime.handle(),
        Duration::from_secs(config.sweeper.interval_seconds),
        Duration::from_secs(config.sweeper.offline_after_seconds),
    ));

    // 10. HTTP state
    let app_state = AppState {
        cluster: cluster.clone(),
        presence,
        commands,
        dashboard_tokens: JwtService::hs256(config.dashboard_auth.jwt_secret.as_bytes(), 0)?,
        broker: Arc::new(BrokerAuthorizer::new(
            JwtService::hs256(
                config.broker_auth.device_token_secret.as_bytes(),
                config.broker_auth.leeway_seconds,
            )?,
            config.broker_auth.bridge_username.clone(),
            config.broker_auth.bridge_secret.clone(),
        )),
    };

    let components = Components {
        pool,
        cluster,
        batcher,
        relay,
        signals,
        sweeper,
        config_sync: Arc::new(config_sync),
        alt_listener,
        app_state,
    };

    // 11. Run until signalled
    FleetRelayServer::new(config, components).start().await
}
