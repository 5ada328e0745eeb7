//! Stale sweeper: safety net for devices whose offline signal never arrived

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetrelay_core::metrics;
use fleetrelay_core::models::{ChangeType, EventEnvelope};
use fleetrelay_core::repository::DeviceStore;
use fleetrelay_core::service::RuntimeConfigHandle;
use fleetrelay_core::{EventSink, PresenceIndex};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;

pub struct StaleSweeper {
    devices: Arc<dyn DeviceStore>,
    presence: PresenceIndex,
    sink: Arc<dyn EventSink>,
    runtime: RuntimeConfigHandle,
    interval: Duration,
    offline_after: chrono::Duration,
}

impl StaleSweeper {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        presence: PresenceIndex,
        sink: Arc<dyn EventSink>,
        runtime: RuntimeConfigHandle,
        interval: Duration,
        offline_after: Duration,
    ) -> Self {
        Self {
            devices,
            presence,
            sink,
            runtime,
            interval,
            offline_after: chrono::Duration::from_std(offline_after)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
        }
    }

    /// Flip every device last seen before `now - offline_after`; returns how many flipped
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.offline_after;
        let flipped = self.devices.flip_stale_offline(cutoff).await?;

        for device in &flipped {
            self.presence.mark_offline(&device.device_id).await;
            let new = serde_json::to_value(device)?;
            let old = json!({
                "device_id": device.device_id,
                "status": true,
                "last_seen": device.last_seen,
            });
            self.sink.emit(
                EventEnvelope::device_change(ChangeType::Update, device.device_id.clone(), new)
                    .with_old(Some(old)),
            );
        }

        metrics::sweeper::DEVICES_FLIPPED.inc_by(flipped.len() as u64);
        if !flipped.is_empty() {
            info!(count = flipped.len(), %cutoff, "Marked stale devices offline");
        }
        Ok(flipped.len())
    }

    /// One timer tick; skipped while `staleCheckEnabled` is off
    pub async fn tick(&self, now: DateTime<Utc>) {
        if !self.runtime.current().stale_check_enabled {
            debug!("Stale check disabled, skipping sweep");
            return;
        }
        if let Err(e) = self.sweep_once(now).await {
            error!(error = %e, "Stale sweep failed");
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Stale sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => self.tick(Utc::now()).await,
                }
            }
        })
    }
}
