//! Cluster synchronization service
//!
//! Single entry point for room delivery:
//! - Local broadcasting via `RoomMessageHub`
//! - Cross-node synchronization via Redis Pub/Sub
//! - Message deduplication

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::dedup::MessageDeduplicator;
use super::events::RoomEvent;
use super::redis_pubsub::RedisPubSub;
use super::room_hub::{ConnectionId, RoomMessageHub};
use crate::rooms::RoomName;
use crate::Result;

/// Cluster configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Redis connection URL; empty runs single-node
    pub redis_url: String,
    /// Unique identifier for this node
    pub node_id: String,
    /// Deduplication window duration
    pub dedup_window: Duration,
    /// How often to cleanup dedup entries
    pub cleanup_interval: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            redis_url: String::new(),
            node_id: format!("node_{}", nanoid::nanoid!(8)),
            dedup_window: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

pub struct ClusterManager {
    message_hub: Arc<RoomMessageHub>,
    deduplicator: Arc<MessageDeduplicator>,
    redis_publish_tx: Option<mpsc::Sender<RoomEvent>>,
    node_id: String,
    /// Kept for graceful shutdown
    redis_pubsub: Option<Arc<RedisPubSub>>,
}

impl ClusterManager {
    /// Create a cluster manager and start the Redis transport if configured.
    /// Must be called inside a Tokio runtime.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let message_hub = Arc::new(RoomMessageHub::new());
        let deduplicator = Arc::new(MessageDeduplicator::new(
            config.dedup_window,
            config.cleanup_interval,
        ));

        let (redis_publish_tx, redis_pubsub) = if config.redis_url.is_empty() {
            warn!("Redis URL not provided, running in single-node mode");
            (None, None)
        } else {
            let redis_pubsub = Arc::new(RedisPubSub::new(
                &config.redis_url,
                message_hub.clone(),
                config.node_id.clone(),
                deduplicator.clone(),
            )?);
            let tx = redis_pubsub.clone().start();
            (Some(tx), Some(redis_pubsub))
        };

        info!(node_id = %config.node_id, clustered = redis_pubsub.is_some(), "Cluster manager started");

        Ok(Self {
            message_hub,
            deduplicator,
            redis_publish_tx,
            node_id: config.node_id,
            redis_pubsub,
        })
    }

    /// Single-node manager with default settings
    pub fn standalone() -> Result<Self> {
        Self::new(ClusterConfig::default())
    }

    #[must_use]
    pub const fn message_hub(&self) -> &Arc<RoomMessageHub> {
        &self.message_hub
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Stop the Redis tasks and dedup cleanup
    pub fn shutdown(&self) {
        info!("Shutting down ClusterManager");
        if let Some(ref pubsub) = self.redis_pubsub {
            pubsub.shutdown();
        }
        self.deduplicator.shutdown();
    }

    /// Deliver to local room members and queue for other nodes
    pub fn broadcast(&self, event: RoomEvent) -> BroadcastResult {
        if !self.deduplicator.should_process(&event.event_id) {
            debug!(event_id = %event.event_id, room = %event.room, "Duplicate event detected, skipping");
            return BroadcastResult::default();
        }

        let local_sent = self.message_hub.broadcast(&event);
        let mut redis_sent = false;

        // non-blocking; a full channel means Redis has been down for a while
        if let Some(tx) = &self.redis_publish_tx {
            match tx.try_send(event) {
                Ok(()) => redis_sent = true,
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(
                        room = %event.room,
                        "Redis publish channel full (capacity {}), dropping event",
                        RedisPubSub::PUBLISH_CHANNEL_CAPACITY
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    error!("Redis publish channel closed, cannot queue event");
                }
            }
        }

        BroadcastResult { local_sent, redis_sent }
    }

    /// Register a dashboard connection; it starts out in the global room
    pub fn register(&self, subject: &str) -> (mpsc::Receiver<RoomEvent>, ConnectionId) {
        let connection_id = format!("{}_{}", subject, nanoid::nanoid!(8));
        let rx = self.message_hub.register(connection_id.clone(), subject.to_string());
        (rx, connection_id)
    }

    pub fn join(&self, connection_id: &str, room: RoomName) -> bool {
        self.message_hub.join(connection_id, room)
    }

    pub fn leave(&self, connection_id: &str, room: &RoomName) -> bool {
        self.message_hub.leave(connection_id, room)
    }

    pub fn unregister(&self, connection_id: &str) {
        self.message_hub.unregister(connection_id);
    }

    #[must_use]
    pub fn metrics(&self) -> ClusterMetrics {
        ClusterMetrics {
            node_id: self.node_id.clone(),
            total_rooms: self.message_hub.room_count(),
            total_connections: self.message_hub.connection_count(),
            tracked_events: self.deduplicator.len(),
            redis_enabled: self.redis_publish_tx.is_some(),
        }
    }
}

/// Result of broadcasting an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Number of local subscribers the event was sent to
    pub local_sent: usize,
    /// Whether the event was queued for Redis
    pub redis_sent: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterMetrics {
    pub node_id: String,
    pub total_rooms: usize,
    pub total_connections: usize,
    pub tracked_events: usize,
    pub redis_enabled: bool,
}
