//! Broker telemetry flowing through signals, the relay engine and the room hub

use std::sync::Arc;
use std::time::Duration;

use fleetrelay_cluster::{AdminBatcher, ClusterManager, RelayEngine, RoomEvent, RoomName};
use fleetrelay_core::models::{Device, DeviceId, RuntimeConfig};
use fleetrelay_core::repository::MockDeviceStore;
use fleetrelay_core::service::RuntimeConfigHandle;
use fleetrelay_core::PresenceIndex;
use fleetrelay_ingest::mqtt::handle_mqtt_message;
use fleetrelay_ingest::DeviceSignals;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

struct Node {
    cluster: Arc<ClusterManager>,
    batcher: Arc<AdminBatcher>,
    signals: DeviceSignals,
    presence: PresenceIndex,
}

fn node(config: RuntimeConfig) -> Node {
    let mut store = MockDeviceStore::new();
    store.expect_record_heartbeat().returning(|id, heartbeat, at| {
        Ok(Device {
            device_id: id.clone(),
            status: true,
            last_seen: Some(at),
            heartbeat: Some(heartbeat),
            app_id: None,
        })
    });

    let cluster = Arc::new(ClusterManager::standalone().unwrap());
    let batcher = Arc::new(AdminBatcher::new(cluster.clone(), Duration::from_secs(1)));
    let engine = Arc::new(RelayEngine::new(
        cluster.clone(),
        batcher.clone(),
        RuntimeConfigHandle::fixed(config),
    ));
    let presence = PresenceIndex::in_memory(Duration::from_secs(300));
    let signals = DeviceSignals::new(presence.clone(), Arc::new(store), engine);

    Node {
        cluster,
        batcher,
        signals,
        presence,
    }
}

fn join(cluster: &ClusterManager, room: Option<RoomName>) -> Receiver<RoomEvent> {
    let (rx, conn_id) = cluster.register("operator");
    if let Some(room) = room {
        assert!(cluster.join(&conn_id, room));
    }
    rx
}

fn drain(rx: &mut Receiver<RoomEvent>) -> Vec<RoomEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_broker_telemetry_reaches_device_global_and_admin_rooms() {
    let node = node(RuntimeConfig::default());
    let device = DeviceId::from("dev-1");
    let device_room = RoomName::device(&device);

    let mut detail_rx = join(&node.cluster, Some(device_room.clone()));
    let mut global_rx = join(&node.cluster, None);
    let mut admin_rx = join(&node.cluster, Some(RoomName::admin_dashboard()));

    let cancel = CancellationToken::new();
    let flusher = node.batcher.clone().start(cancel.clone());

    handle_mqtt_message(&node.signals, "devices/dev-1/telemetry", br#"{"battery":85}"#).await;
    assert!(node.presence.is_online(&device).await);

    let detail: Vec<_> = drain(&mut detail_rx)
        .into_iter()
        .filter(|e| e.room == device_room)
        .collect();
    assert_eq!(detail.len(), 1);
    let row = &detail[0].payload["new"];
    assert_eq!(row["device_id"], "dev-1");
    assert_eq!(row["battery"], 85);
    let last_seen = row["last_seen"].clone();
    assert!(last_seen.is_string());

    let global = drain(&mut global_rx);
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].payload["new"]["battery"], 85);

    // nothing reaches the admin room until the next flush tick
    assert!(drain(&mut admin_rx).iter().all(|e| e.room != RoomName::admin_dashboard()));
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let admin: Vec<_> = drain(&mut admin_rx)
        .into_iter()
        .filter(|e| e.room == RoomName::admin_dashboard())
        .collect();
    assert_eq!(admin.len(), 1);
    assert_eq!(
        admin[0].payload,
        serde_json::json!([{"device_id": "dev-1", "status": true, "last_seen": last_seen}])
    );

    cancel.cancel();
    flusher.await.unwrap();
}

#[tokio::test]
async fn test_high_scale_mode_keeps_room_delivery_only() {
    let node = node(RuntimeConfig {
        high_scale_mode: true,
        ..RuntimeConfig::default()
    });
    let device_room = RoomName::device(&DeviceId::from("dev-1"));
    let mut detail_rx = join(&node.cluster, Some(device_room.clone()));
    let mut global_rx = join(&node.cluster, None);
    let mut admin_rx = join(&node.cluster, Some(RoomName::admin_dashboard()));

    handle_mqtt_message(&node.signals, "devices/dev-1/telemetry", br#"{"battery":12}"#).await;
    node.batcher.flush();

    assert!(drain(&mut global_rx).is_empty());
    assert_eq!(drain(&mut detail_rx).len(), 1);
    let admin = drain(&mut admin_rx);
    assert_eq!(admin.len(), 1);
    assert_eq!(admin[0].room, RoomName::admin_dashboard());
}
