use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::RoomEvent;
use crate::rooms::RoomName;

/// Handle for a client connection subscription
pub type ConnectionId = String;

/// Message sender for a client connection
pub type MessageSender = mpsc::Sender<RoomEvent>;

/// Events queued per connection before it is treated as too slow and dropped
pub const CONNECTION_QUEUE_CAPACITY: usize = 1024;

/// A registered dashboard connection
#[derive(Debug, Clone)]
struct Subscriber {
    subject: String,
    sender: MessageSender,
}

/// In-memory hub routing room events to the connections on this node.
///
/// A connection joins any number of rooms; `global` membership is implicit on register.
/// Each connection has a bounded queue; a connection whose queue is full is unregistered.
#[derive(Clone)]
pub struct RoomMessageHub {
    /// room -> member connection ids
    rooms: Arc<DashMap<RoomName, HashSet<ConnectionId>>>,

    /// connection id -> subscriber
    connections: Arc<DashMap<ConnectionId, Subscriber>>,

    queue_capacity: usize,
}

impl Default for RoomMessageHub {
    fn default() -> Self {
        Self::with_queue_capacity(CONNECTION_QUEUE_CAPACITY)
    }
}

impl RoomMessageHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            rooms: Arc::default(),
            connections: Arc::default(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a connection and place it in the global room
    pub fn register(&self, connection_id: ConnectionId, subject: String) -> mpsc::Receiver<RoomEvent> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.connections.insert(
            connection_id.clone(),
            Subscriber {
                subject: subject.clone(),
                sender: tx,
            },
        );
        self.rooms
            .entry(RoomName::global())
            .or_default()
            .insert(connection_id.clone());

        info!(connection_id = %connection_id, subject = %subject, "Dashboard connection registered");
        rx
    }

    /// Returns `false` for unknown connections
    pub fn join(&self, connection_id: &str, room: RoomName) -> bool {
        if !self.connections.contains_key(connection_id) {
            warn!(connection_id = %connection_id, room = %room, "Join from unknown connection");
            return false;
        }
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(connection_id.to_string());
        debug!(connection_id = %connection_id, room = %room, "Joined room");
        true
    }

    /// Leave a room. The global room cannot be left.
    pub fn leave(&self, connection_id: &str, room: &RoomName) -> bool {
        if room.is_global() {
            return false;
        }
        let removed = self.remove_member(room, connection_id);
        if removed {
            debug!(connection_id = %connection_id, room = %room, "Left room");
        }
        removed
    }

    /// Drop a connection and all of its memberships
    pub fn unregister(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_none() {
            // already dropped by broadcast
            debug!(connection_id = %connection_id, "Connection already unregistered");
            return;
        }

        let rooms: Vec<RoomName> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(connection_id))
            .map(|entry| entry.key().clone())
            .collect();
        for room in rooms {
            self.remove_member(&room, connection_id);
        }

        info!(connection_id = %connection_id, "Dashboard connection unregistered");
    }

    fn remove_member(&self, room: &RoomName, connection_id: &str) -> bool {
        let mut removed = false;
        if let Some(mut members) = self.rooms.get_mut(room) {
            removed = members.remove(connection_id);
        }
        // remove_if re-checks under the shard lock
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    /// Broadcast an event to all local members of its room
    pub fn broadcast(&self, event: &RoomEvent) -> usize {
        let members: Vec<ConnectionId> = self
            .rooms
            .get(&event.room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();

        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        for connection_id in members {
            let Some(subscriber) = self.connections.get(&connection_id) else {
                continue;
            };
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => sent_count += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        room = %event.room,
                        subject = %subscriber.subject,
                        connection_id = %connection_id,
                        capacity = self.queue_capacity,
                        "Client is not keeping up, dropping connection"
                    );
                    failed_connections.push(connection_id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        connection_id = %connection_id,
                        "Client receiver closed, marking for cleanup"
                    );
                    failed_connections.push(connection_id.clone());
                }
            }
        }

        for conn_id in failed_connections {
            self.unregister(&conn_id);
        }

        if sent_count > 0 {
            debug!(
                room = %event.room,
                event = %event.name,
                sent_count,
                "Event broadcast complete"
            );
        }

        sent_count
    }

    #[must_use]
    pub fn subscriber_count(&self, room: &RoomName) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::EventName;
    use fleetrelay_core::models::DeviceId;
    use serde_json::json;

    fn event(room: RoomName) -> RoomEvent {
        RoomEvent::new(room, EventName::DeviceChange, json!({"device_id": "dev-1"}))
    }

    #[tokio::test]
    async fn test_register_joins_global() {
        let hub = RoomMessageHub::new();
        let mut rx = hub.register("conn1".to_string(), "operator".to_string());

        assert_eq!(hub.subscriber_count(&RoomName::global()), 1);
        assert_eq!(hub.broadcast(&event(RoomName::global())), 1);
        assert_eq!(rx.recv().await.unwrap().name, EventName::DeviceChange);
    }

    #[tokio::test]
    async fn test_join_and_leave_device_room() {
        let hub = RoomMessageHub::new();
        let room = RoomName::device(&DeviceId::from("dev-1"));
        let mut rx = hub.register("conn1".to_string(), "operator".to_string());

        assert!(hub.join("conn1", room.clone()));
        assert_eq!(hub.broadcast(&event(room.clone())), 1);
        assert!(rx.recv().await.is_some());

        assert!(hub.leave("conn1", &room));
        assert_eq!(hub.broadcast(&event(room.clone())), 0);
        assert_eq!(hub.subscriber_count(&room), 0);
        // empty rooms are dropped, global remains
        assert_eq!(hub.room_count(), 1);
    }

    #[tokio::test]
    async fn test_global_cannot_be_left() {
        let hub = RoomMessageHub::new();
        let _rx = hub.register("conn1".to_string(), "operator".to_string());
        assert!(!hub.leave("conn1", &RoomName::global()));
        assert_eq!(hub.subscriber_count(&RoomName::global()), 1);
    }

    #[tokio::test]
    async fn test_join_unknown_connection_rejected() {
        let hub = RoomMessageHub::new();
        assert!(!hub.join("ghost", RoomName::admin_dashboard()));
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_unregister_removes_all_memberships() {
        let hub = RoomMessageHub::new();
        let _rx = hub.register("conn1".to_string(), "operator".to_string());
        hub.join("conn1", RoomName::admin_dashboard());
        hub.join("conn1", RoomName::device(&DeviceId::from("dev-1")));

        hub.unregister("conn1");
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_room_isolation() {
        let hub = RoomMessageHub::new();
        let dev1 = RoomName::device(&DeviceId::from("dev-1"));
        let dev2 = RoomName::device(&DeviceId::from("dev-2"));
        let mut rx1 = hub.register("conn1".to_string(), "a".to_string());
        let mut rx2 = hub.register("conn2".to_string(), "b".to_string());
        hub.join("conn1", dev1.clone());
        hub.join("conn2", dev2);

        assert_eq!(hub.broadcast(&event(dev1)), 1);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_cleaned_up_on_broadcast() {
        let hub = RoomMessageHub::new();
        let rx = hub.register("conn1".to_string(), "operator".to_string());
        drop(rx);

        assert_eq!(hub.broadcast(&event(RoomName::global())), 0);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_connection_dropped_when_queue_full() {
        let hub = RoomMessageHub::with_queue_capacity(2);
        let mut slow = hub.register("slow".to_string(), "operator".to_string());
        let mut fast = hub.register("fast".to_string(), "operator".to_string());

        for _ in 0..2 {
            assert_eq!(hub.broadcast(&event(RoomName::global())), 2);
            fast.recv().await.unwrap();
        }
        // slow has two queued and never read; the third overflows it
        assert_eq!(hub.broadcast(&event(RoomName::global())), 1);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.subscriber_count(&RoomName::global()), 1);

        // queued events drain, then the stream ends
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
        assert!(fast.recv().await.is_some());
    }
}
