//! Server lifecycle management
//!
//! Starts the timers, upstream adapters and HTTP server, then tears them
//! down in dependency order on SIGTERM/SIGINT:
//! alt listener, timers, MQTT, Postgres listener and cluster, HTTP.

use std::sync::Arc;
use std::time::Duration;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleetrelay_api::AppState;
use fleetrelay_cluster::{AdminBatcher, ClusterManager};
use fleetrelay_core::{Config, EventSink};
use fleetrelay_ingest::{AltSourceListener, ConfigSync, DeviceSignals, MqttSubscriber, PgChangeListener, StaleSweeper};

/// Container for the long-lived components wired up in `main`
pub struct Components {
    pub pool: PgPool,
    pub cluster: Arc<ClusterManager>,
    pub batcher: Arc<AdminBatcher>,
    pub relay: Arc<dyn EventSink>,
    pub signals: Arc<DeviceSignals>,
    pub sweeper: Arc<StaleSweeper>,
    pub config_sync: Arc<ConfigSync>,
    pub alt_listener: Option<Arc<AltSourceListener>>,
    pub app_state: AppState,
}

/// Tasks that must be joined during shutdown
struct Running {
    timers: CancellationToken,
    timer_handles: Vec<JoinHandle<()>>,
    mqtt: CancellationToken,
    mqtt_handle: Option<JoinHandle<()>>,
    pg: CancellationToken,
    pg_handle: JoinHandle<()>,
    http_shutdown: watch::Sender<bool>,
}

pub struct FleetRelayServer {
    config: Config,
    components: Components,
}

impl FleetRelayServer {
    pub const fn new(config: Config, components: Components) -> Self {
        Self { config, components }
    }

    /// Start everything and block until a shutdown signal or an HTTP failure
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting fleetrelay server...");

        // first snapshot before any timer ticks; also starts the alt listener if enabled
        let snapshot = self.components.config_sync.sync_once().await;
        info!(
            relay_enabled = snapshot.relay_enabled,
            stale_check_enabled = snapshot.stale_check_enabled,
            alt_source_enabled = snapshot.alt_source_enabled,
            high_scale_mode = snapshot.high_scale_mode,
            "Initial runtime config loaded"
        );

        let timers = CancellationToken::new();
        let timer_handles = vec![
            self.components.batcher.clone().start(timers.clone()),
            self.components.sweeper.clone().start(timers.clone()),
            self.components.config_sync.clone().start(timers.clone()),
        ];

        let mqtt = CancellationToken::new();
        let mqtt_handle = if self.config.mqtt.enabled {
            let subscriber = MqttSubscriber::new(self.config.mqtt.clone(), self.components.signals.clone());
            Some(tokio::spawn(subscriber.run(mqtt.clone())))
        } else {
            warn!("MQTT subscriber disabled");
            None
        };

        let pg = CancellationToken::new();
        let listener = PgChangeListener::new(self.components.pool.clone(), self.components.relay.clone());
        let pg_handle = tokio::spawn(listener.run(pg.clone()));

        let (http_shutdown, shutdown_rx) = watch::channel(false);
        let mut http_handle = self.start_http_server(shutdown_rx).await?;

        info!("All components started successfully");

        let http_finished = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                true
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                false
            }
        };

        let running = Running {
            timers,
            timer_handles,
            mqtt,
            mqtt_handle,
            pg,
            pg_handle,
            http_shutdown,
        };

        let grace = Duration::from_secs(self.config.shutdown.grace_seconds);
        let http_handle = (!http_finished).then_some(http_handle);
        if tokio::time::timeout(grace, self.shutdown(running, http_handle)).await.is_err() {
            error!(grace_seconds = grace.as_secs(), "Graceful shutdown timed out, exiting");
            std::process::exit(1);
        }

        info!("fleetrelay stopped");
        Ok(())
    }

    async fn shutdown(&self, running: Running, http_handle: Option<JoinHandle<()>>) {
        info!("Shutting down fleetrelay server...");

        // 1. Alternate source listener
        if let Some(listener) = &self.components.alt_listener {
            if listener.stop().await {
                info!("Alternate source listener stopped");
            }
        }

        // 2. Timers; the batcher flushes what it holds on the way out
        running.timers.cancel();
        for handle in running.timer_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Timer task ended abnormally");
            }
        }
        // a config poll racing step 1 may have restarted it
        if let Some(listener) = &self.components.alt_listener {
            listener.stop().await;
        }

        // 3. MQTT bridge connection
        running.mqtt.cancel();
        if let Some(handle) = running.mqtt_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "MQTT subscriber ended abnormally");
            }
        }

        // 4. Postgres change feed, then the cluster transport
        running.pg.cancel();
        if let Err(e) = running.pg_handle.await {
            warn!(error = %e, "Postgres listener ended abnormally");
        }
        self.components.cluster.shutdown();

        // 5. HTTP
        let _ = running.http_shutdown.send(true);
        if let Some(handle) = http_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "HTTP server task ended abnormally");
            }
        }
        self.components.pool.close().await;
    }

    /// Start HTTP server with graceful shutdown support
    async fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let http_router = fleetrelay_api::create_router(self.components.app_state.clone());

        let handle = tokio::spawn(async move {
            info!("HTTP server listening on {}", http_addr);

            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
