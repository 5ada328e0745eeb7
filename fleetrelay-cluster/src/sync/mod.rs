pub mod cluster_manager;
pub mod dedup;
pub mod events;
pub mod redis_pubsub;
pub mod room_hub;

pub use cluster_manager::{BroadcastResult, ClusterConfig, ClusterManager, ClusterMetrics};
pub use dedup::MessageDeduplicator;
pub use events::{EventName, RoomEvent};
pub use redis_pubsub::RedisPubSub;
pub use room_hub::{ConnectionId, MessageSender, RoomMessageHub};
