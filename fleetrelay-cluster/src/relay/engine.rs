use std::sync::Arc;

use fleetrelay_core::metrics;
use fleetrelay_core::models::{EventEnvelope, EventKind};
use fleetrelay_core::service::RuntimeConfigHandle;
use fleetrelay_core::EventSink;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::AdminBatcher;
use crate::rooms::RoomName;
use crate::sync::{ClusterManager, EventName, RoomEvent};

/// Fan-out point for every adapter, the sweeper and the command service
pub struct RelayEngine {
    cluster: Arc<ClusterManager>,
    batcher: Arc<AdminBatcher>,
    runtime: RuntimeConfigHandle,
}

impl RelayEngine {
    #[must_use]
    pub const fn new(
        cluster: Arc<ClusterManager>,
        batcher: Arc<AdminBatcher>,
        runtime: RuntimeConfigHandle,
    ) -> Self {
        Self {
            cluster,
            batcher,
            runtime,
        }
    }

    #[must_use]
    pub const fn cluster(&self) -> &Arc<ClusterManager> {
        &self.cluster
    }

    #[must_use]
    pub const fn batcher(&self) -> &Arc<AdminBatcher> {
        &self.batcher
    }

    fn deliver(&self, kind: EventKind, route: &str, room: RoomName, payload: JsonValue) {
        metrics::relay::EVENTS_TOTAL
            .with_label_values(&[kind.as_str(), route])
            .inc();
        let result = self
            .cluster
            .broadcast(RoomEvent::new(room, EventName::from(kind), payload));
        debug!(kind = %kind, route, local_sent = result.local_sent, "Relayed event");
    }
}

impl EventSink for RelayEngine {
    fn emit(&self, envelope: EventEnvelope) {
        let config = self.runtime.current();
        let kind = envelope.kind;

        if !config.relay_enabled {
            metrics::relay::EVENTS_TOTAL
                .with_label_values(&[kind.as_str(), "dropped"])
                .inc();
            debug!(kind = %kind, device_id = %envelope.device_id, "Relay disabled, dropping event");
            return;
        }

        let payload = envelope.payload();
        let device_id = &envelope.device_id;

        match kind {
            EventKind::DeviceChange => {
                self.deliver(kind, "device", RoomName::device(device_id), payload.clone());
                self.batcher.push_device(envelope.light());
                metrics::relay::EVENTS_TOTAL
                    .with_label_values(&[kind.as_str(), "admin"])
                    .inc();
            }
            EventKind::MessageChange => {
                self.deliver(kind, "device", RoomName::device(device_id), payload.clone());
                if let Some(row) = envelope.row() {
                    self.batcher.push_message(row.clone());
                    metrics::relay::EVENTS_TOTAL
                        .with_label_values(&[kind.as_str(), "admin"])
                        .inc();
                }
            }
            EventKind::KeylogChange => {
                self.deliver(kind, "device", RoomName::device(device_id), payload.clone());
                self.deliver(kind, "admin", RoomName::admin_dashboard(), payload.clone());
            }
            EventKind::CommandChange => {
                self.deliver(kind, "command", RoomName::commands(device_id), payload.clone());
                self.deliver(kind, "command", RoomName::command_feed(), payload);
                return;
            }
        }

        if !config.high_scale_mode {
            self.deliver(kind, "global", RoomName::global(), payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetrelay_core::models::{ChangeType, DeviceId, RuntimeConfig};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::Receiver;

    struct Harness {
        engine: RelayEngine,
        cluster: Arc<ClusterManager>,
    }

    impl Harness {
        fn new(config: RuntimeConfig) -> Self {
            let cluster = Arc::new(ClusterManager::standalone().unwrap());
            let batcher = Arc::new(AdminBatcher::new(cluster.clone(), Duration::from_secs(1)));
            let engine = RelayEngine::new(cluster.clone(), batcher, RuntimeConfigHandle::fixed(config));
            Self { engine, cluster }
        }

        /// A connection that is only in the global room
        fn global_watcher(&self) -> Receiver<RoomEvent> {
            self.cluster.register("viewer").0
        }

        /// A connection in `room`; global traffic is filtered out by the caller
        fn watcher(&self, room: RoomName) -> Receiver<RoomEvent> {
            let (rx, conn_id) = self.cluster.register("watcher");
            self.cluster.join(&conn_id, room);
            rx
        }
    }

    fn drain(rx: &mut Receiver<RoomEvent>) -> Vec<RoomEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn in_room<'a>(events: &'a [RoomEvent], room: &RoomName) -> Vec<&'a RoomEvent> {
        events.iter().filter(|e| &e.room == room).collect()
    }

    fn device_update(id: &str) -> EventEnvelope {
        EventEnvelope::device_change(
            ChangeType::Update,
            DeviceId::from(id),
            json!({"device_id": id, "battery": 85, "status": true, "last_seen": "2026-10-16T00:00:00Z"}),
        )
    }

    #[tokio::test]
    async fn test_device_change_reaches_device_global_and_admin_batch() {
        let harness = Harness::new(RuntimeConfig::default());
        let device_room = RoomName::device(&DeviceId::from("dev-1"));
        let mut device_rx = harness.watcher(device_room.clone());
        let mut global_rx = harness.global_watcher();

        harness.engine.emit(device_update("dev-1"));

        let events = drain(&mut device_rx);
        let direct = in_room(&events, &device_room);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].name, EventName::DeviceChange);
        assert_eq!(direct[0].payload["new"]["battery"], 85);
        assert_eq!(direct[0].payload["eventType"], "UPDATE");

        let global = drain(&mut global_rx);
        assert_eq!(global.len(), 1);
        assert!(global[0].room.is_global());

        assert_eq!(harness.engine.batcher().pending(), (1, 0));
    }

    #[tokio::test]
    async fn test_admin_batch_carries_light_projection() {
        let harness = Harness::new(RuntimeConfig::default());
        let mut admin_rx = harness.watcher(RoomName::admin_dashboard());

        harness.engine.emit(device_update("dev-1"));
        harness.engine.batcher().flush();

        let events = drain(&mut admin_rx);
        let bulk = in_room(&events, &RoomName::admin_dashboard());
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].name, EventName::BulkDeviceChange);
        assert_eq!(
            bulk[0].payload,
            json!([{"device_id": "dev-1", "status": true, "last_seen": "2026-10-16T00:00:00Z"}])
        );
    }

    #[tokio::test]
    async fn test_high_scale_mode_skips_global_room() {
        let harness = Harness::new(RuntimeConfig {
            high_scale_mode: true,
            ..RuntimeConfig::default()
        });
        let device_room = RoomName::device(&DeviceId::from("dev-1"));
        let mut device_rx = harness.watcher(device_room.clone());
        let mut global_rx = harness.global_watcher();

        harness.engine.emit(device_update("dev-1"));
        harness.engine.emit(EventEnvelope::message_change(
            ChangeType::Insert,
            DeviceId::from("dev-1"),
            json!({"device_id": "dev-1", "body": "hello"}),
        ));

        assert!(drain(&mut global_rx).is_empty());
        assert_eq!(drain(&mut device_rx).len(), 2);
        assert_eq!(harness.engine.batcher().pending(), (1, 1));
    }

    #[tokio::test]
    async fn test_relay_disabled_sends_nothing() {
        let harness = Harness::new(RuntimeConfig {
            relay_enabled: false,
            ..RuntimeConfig::default()
        });
        let mut device_rx = harness.watcher(RoomName::device(&DeviceId::from("dev-1")));

        harness.engine.emit(device_update("dev-1"));

        assert!(drain(&mut device_rx).is_empty());
        assert_eq!(harness.engine.batcher().pending(), (0, 0));
    }

    #[tokio::test]
    async fn test_keylog_goes_to_admin_immediately() {
        let harness = Harness::new(RuntimeConfig::default());
        let mut admin_rx = harness.watcher(RoomName::admin_dashboard());

        harness.engine.emit(EventEnvelope::new(
            EventKind::KeylogChange,
            ChangeType::Insert,
            DeviceId::from("dev-1"),
            Some(json!({"device_id": "dev-1", "text": "abc"})),
        ));

        let events = drain(&mut admin_rx);
        let admin = in_room(&events, &RoomName::admin_dashboard());
        assert_eq!(admin.len(), 1);
        assert_eq!(admin[0].name, EventName::KeylogChange);
        assert_eq!(harness.engine.batcher().pending(), (0, 0));
    }

    #[tokio::test]
    async fn test_command_change_routes_to_command_rooms_only() {
        let harness = Harness::new(RuntimeConfig::default());
        let device = DeviceId::from("dev-1");
        let mut commands_rx = harness.watcher(RoomName::commands(&device));
        let mut feed_rx = harness.watcher(RoomName::command_feed());
        let mut global_rx = harness.global_watcher();

        harness.engine.emit(EventEnvelope::new(
            EventKind::CommandChange,
            ChangeType::Update,
            device.clone(),
            Some(json!({"id": "c1", "device_id": "dev-1", "status": "delivered"})),
        ));

        assert_eq!(in_room(&drain(&mut commands_rx), &RoomName::commands(&device)).len(), 1);
        assert_eq!(in_room(&drain(&mut feed_rx), &RoomName::command_feed()).len(), 1);
        assert!(drain(&mut global_rx).is_empty());
    }
}
