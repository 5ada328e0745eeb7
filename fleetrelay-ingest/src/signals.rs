//! Device-level signals shared by every adapter
//!
//! Each signal updates presence first, then the primary store, then relays a
//! `device_change`/`message_change`. A store failure is logged and the event
//! is still relayed from the signal itself, so dashboards keep up while the
//! database is unavailable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetrelay_core::models::{ChangeType, Device, DeviceId, EventEnvelope};
use fleetrelay_core::repository::DeviceStore;
use fleetrelay_core::{EventSink, PresenceIndex};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

pub struct DeviceSignals {
    presence: PresenceIndex,
    devices: Arc<dyn DeviceStore>,
    sink: Arc<dyn EventSink>,
}

impl DeviceSignals {
    pub fn new(presence: PresenceIndex, devices: Arc<dyn DeviceStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            presence,
            devices,
            sink,
        }
    }

    /// Explicit online/offline signal
    pub async fn status(&self, device_id: &DeviceId, online: bool) {
        let seen_at = Utc::now();
        if online {
            self.presence.mark_online(device_id).await;
        } else {
            self.presence.mark_offline(device_id).await;
        }

        let row = match self.devices.upsert_status(device_id, online, seen_at).await {
            Ok(device) => device_row(&device),
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to persist device status");
                json!({
                    "device_id": device_id,
                    "status": online,
                    "last_seen": online.then_some(seen_at),
                })
            }
        };

        debug!(device_id = %device_id, online, "Device status signal");
        self.sink
            .emit(EventEnvelope::device_change(ChangeType::Update, device_id.clone(), row));
    }

    /// Telemetry is itself a liveness signal; the relayed row is the telemetry
    /// object plus identity, status and a server-side receipt time.
    pub async fn telemetry(&self, device_id: &DeviceId, telemetry: JsonValue) {
        self.telemetry_at(device_id, telemetry, Utc::now()).await;
    }

    pub(crate) async fn telemetry_at(&self, device_id: &DeviceId, telemetry: JsonValue, seen_at: DateTime<Utc>) {
        self.presence.mark_online(device_id).await;

        let mut row = match telemetry {
            JsonValue::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("heartbeat".to_string(), other);
                map
            }
        };

        let last_seen = match self
            .devices
            .record_heartbeat(device_id, JsonValue::Object(row.clone()), seen_at)
            .await
        {
            Ok(device) => device.last_seen.unwrap_or(seen_at),
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to persist device heartbeat");
                seen_at
            }
        };

        row.insert("device_id".to_string(), json!(device_id));
        row.insert("status".to_string(), JsonValue::Bool(true));
        row.insert("last_seen".to_string(), json!(last_seen));

        self.sink.emit(EventEnvelope::device_change(
            ChangeType::Update,
            device_id.clone(),
            JsonValue::Object(row),
        ));
    }

    /// New message reported by a device; relayed only, persistence belongs to the message store
    pub fn message(&self, device_id: &DeviceId, message: JsonValue) {
        let row = match message {
            JsonValue::Object(mut map) => {
                map.entry("device_id").or_insert_with(|| json!(device_id));
                JsonValue::Object(map)
            }
            other => json!({ "device_id": device_id, "body": other }),
        };

        self.sink
            .emit(EventEnvelope::message_change(ChangeType::Insert, device_id.clone(), row));
    }
}

fn device_row(device: &Device) -> JsonValue {
    serde_json::to_value(device).unwrap_or_else(|_| {
        json!({
            "device_id": device.device_id,
            "status": device.status,
            "last_seen": device.last_seen,
        })
    })
}
