//! Normalized change events produced by every upstream adapter

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use super::DeviceId;

/// Canonical event kind, also the client-facing event name for single events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeviceChange,
    MessageChange,
    KeylogChange,
    CommandChange,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceChange => "device_change",
            Self::MessageChange => "message_change",
            Self::KeylogChange => "keylog_change",
            Self::CommandChange => "command_change",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parse the upper-case form used by change feeds; case-insensitive
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One normalized change, routed by `device_id`
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub change: ChangeType,
    pub device_id: DeviceId,
    pub new: Option<JsonValue>,
    pub old: Option<JsonValue>,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(kind: EventKind, change: ChangeType, device_id: DeviceId, new: Option<JsonValue>) -> Self {
        Self {
            kind,
            change,
            device_id,
            new,
            old: None,
        }
    }

    #[must_use]
    pub fn with_old(mut self, old: Option<JsonValue>) -> Self {
        self.old = old;
        self
    }

    #[must_use]
    pub fn device_change(change: ChangeType, device_id: DeviceId, new: JsonValue) -> Self {
        Self::new(EventKind::DeviceChange, change, device_id, Some(new))
    }

    #[must_use]
    pub fn message_change(change: ChangeType, device_id: DeviceId, new: JsonValue) -> Self {
        Self::new(EventKind::MessageChange, change, device_id, Some(new))
    }

    /// Client-visible `{eventType, new, old}` shape
    #[must_use]
    pub fn payload(&self) -> JsonValue {
        json!({
            "eventType": self.change.as_str(),
            "new": self.new,
            "old": self.old,
        })
    }

    /// The current row, falling back to the previous one for deletes
    #[must_use]
    pub fn row(&self) -> Option<&JsonValue> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// `{device_id, status, last_seen}` projection of a device row
    #[must_use]
    pub fn light(&self) -> JsonValue {
        let mut light = Map::new();
        light.insert("device_id".to_string(), JsonValue::String(self.device_id.to_string()));
        let row = self.row();
        for field in ["status", "last_seen"] {
            let value = row
                .and_then(|r| r.get(field))
                .cloned()
                .unwrap_or(JsonValue::Null);
            light.insert(field.to_string(), value);
        }
        JsonValue::Object(light)
    }
}
