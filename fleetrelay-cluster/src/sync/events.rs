use chrono::{DateTime, Utc};
use fleetrelay_core::models::EventKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::rooms::RoomName;

/// Client-visible event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    DeviceChange,
    MessageChange,
    KeylogChange,
    CommandChange,
    /// Array of light device rows flushed to `admin-dashboard`
    BulkDeviceChange,
    /// Array of message rows flushed to `admin-messages`
    BulkMessageChange,
}

impl EventName {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceChange => "device_change",
            Self::MessageChange => "message_change",
            Self::KeylogChange => "keylog_change",
            Self::CommandChange => "command_change",
            Self::BulkDeviceChange => "bulk_device_change",
            Self::BulkMessageChange => "bulk_message_change",
        }
    }
}

impl From<EventKind> for EventName {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::DeviceChange => Self::DeviceChange,
            EventKind::MessageChange => Self::MessageChange,
            EventKind::KeylogChange => Self::KeylogChange,
            EventKind::CommandChange => Self::CommandChange,
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room-scoped notification, delivered locally and synchronized across nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    /// Unique per emission; the cluster dedup key
    pub event_id: String,
    pub room: RoomName,
    #[serde(rename = "event")]
    pub name: EventName,
    pub payload: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl RoomEvent {
    #[must_use]
    pub fn new(room: RoomName, name: EventName, payload: JsonValue) -> Self {
        Self {
            event_id: nanoid::nanoid!(16),
            room,
            name,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Frame sent to dashboard sockets
    #[must_use]
    pub fn to_client_frame(&self) -> JsonValue {
        serde_json::json!({
            "room": self.room,
            "event": self.name,
            "payload": self.payload,
        })
    }
}
