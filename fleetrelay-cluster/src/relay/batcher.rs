use std::sync::Arc;
use std::time::Duration;

use fleetrelay_core::metrics;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::rooms::RoomName;
use crate::sync::{ClusterManager, EventName, RoomEvent};

/// Process-local buffers for the admin aggregate rooms, drained on one timer
pub struct AdminBatcher {
    cluster: Arc<ClusterManager>,
    devices: Mutex<Vec<JsonValue>>,
    messages: Mutex<Vec<JsonValue>>,
    flush_interval: Duration,
}

impl AdminBatcher {
    #[must_use]
    pub fn new(cluster: Arc<ClusterManager>, flush_interval: Duration) -> Self {
        Self {
            cluster,
            devices: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            flush_interval,
        }
    }

    /// Queue a light device row for `admin-dashboard`
    pub fn push_device(&self, light: JsonValue) {
        self.devices.lock().push(light);
    }

    /// Queue a message row for `admin-messages`
    pub fn push_message(&self, row: JsonValue) {
        self.messages.lock().push(row);
    }

    #[must_use]
    pub fn pending(&self) -> (usize, usize) {
        (self.devices.lock().len(), self.messages.lock().len())
    }

    /// Emit one bulk event per non-empty buffer and clear it
    pub fn flush(&self) {
        let devices = std::mem::take(&mut *self.devices.lock());
        let messages = std::mem::take(&mut *self.messages.lock());

        if !devices.is_empty() {
            self.emit_bulk(RoomName::admin_dashboard(), EventName::BulkDeviceChange, devices);
        }
        if !messages.is_empty() {
            self.emit_bulk(RoomName::admin_messages(), EventName::BulkMessageChange, messages);
        }
    }

    fn emit_bulk(&self, room: RoomName, name: EventName, rows: Vec<JsonValue>) {
        let count = rows.len();
        metrics::relay::BATCHES_FLUSHED
            .with_label_values(&[room.as_str()])
            .inc();
        let result = self
            .cluster
            .broadcast(RoomEvent::new(room.clone(), name, JsonValue::Array(rows)));
        debug!(room = %room, count, local_sent = result.local_sent, "Flushed admin batch");
    }

    /// Drain on a fixed interval until cancelled, with a final flush on the way out
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        self.flush();
                        info!("Admin batcher stopped");
                        return;
                    }
                    _ = ticker.tick() => self.flush(),
                }
            }
        })
    }
}
