//! Runtime config sync: polls the shared record and applies its side effects

use std::sync::Arc;
use std::time::Duration;

use fleetrelay_core::models::{RuntimeConfig, RuntimeConfigPatch};
use fleetrelay_core::repository::RuntimeConfigSource;
use fleetrelay_core::service::RuntimeConfigCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alt_source::AltSourceListener;

pub struct ConfigSync {
    source: Arc<dyn RuntimeConfigSource>,
    cell: Arc<RuntimeConfigCell>,
    record_key: String,
    /// Environment emergency brake for high-scale mode
    force_high_scale: bool,
    alt_listener: Option<Arc<AltSourceListener>>,
    interval: Duration,
}

impl ConfigSync {
    pub fn new(
        source: Arc<dyn RuntimeConfigSource>,
        cell: Arc<RuntimeConfigCell>,
        record_key: impl Into<String>,
        force_high_scale: bool,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            cell,
            record_key: record_key.into(),
            force_high_scale,
            alt_listener: None,
            interval,
        }
    }

    /// Listener started and stopped as `altSourceEnabled` changes
    #[must_use]
    pub fn with_alt_listener(mut self, listener: Arc<AltSourceListener>) -> Self {
        self.alt_listener = Some(listener);
        self
    }

    /// Fetch, merge over the current snapshot, publish, then reconcile the alt listener.
    /// Fetch and parse failures keep the last known good snapshot.
    pub async fn sync_once(&self) -> Arc<RuntimeConfig> {
        let current = self.cell.current();
        let patch = match self.source.fetch(&self.record_key).await {
            Ok(Some(value)) => match RuntimeConfigPatch::from_record(&value) {
                Ok(patch) => patch,
                Err(e) => {
                    warn!(key = %self.record_key, error = %e, "Ignoring malformed runtime config record");
                    RuntimeConfigPatch::default()
                }
            },
            Ok(None) => {
                debug!(key = %self.record_key, "Runtime config record absent, keeping current values");
                RuntimeConfigPatch::default()
            }
            Err(e) => {
                warn!(key = %self.record_key, error = %e, "Runtime config fetch failed, keeping current values");
                RuntimeConfigPatch::default()
            }
        };

        let next = current.merge(&patch).with_forced_high_scale(self.force_high_scale);
        if next != *current {
            info!(
                relay_enabled = next.relay_enabled,
                stale_check_enabled = next.stale_check_enabled,
                alt_source_enabled = next.alt_source_enabled,
                high_scale_mode = next.high_scale_mode,
                "Runtime config changed"
            );
            self.cell.replace(next);
        }

        self.reconcile_alt_source(next.alt_source_enabled).await;
        self.cell.current()
    }

    async fn reconcile_alt_source(&self, enabled: bool) {
        match &self.alt_listener {
            Some(listener) if enabled && !listener.is_active() => {
                listener.start();
            }
            Some(listener) if !enabled && listener.is_active() => {
                listener.stop().await;
            }
            None if enabled => {
                warn!("altSourceEnabled is set but no hierarchical database is configured");
            }
            _ => {}
        }
    }

    /// Poll on a fixed interval; the initial sync is the caller's job
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Runtime config sync stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sync_once().await;
                    }
                }
            }
        })
    }
}
