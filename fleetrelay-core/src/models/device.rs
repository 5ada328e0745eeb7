use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::DeviceId;

/// Device row as persisted by the primary store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    /// Last persisted online flag; live presence lives in the presence index
    pub status: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// Free-form telemetry blob from the latest heartbeat
    pub heartbeat: Option<JsonValue>,
    pub app_id: Option<String>,
}

impl Device {
    /// Identity/status/recency projection used by admin list views
    #[must_use]
    pub fn light(&self) -> DeviceLight {
        DeviceLight {
            device_id: self.device_id.clone(),
            status: self.status,
            last_seen: self.last_seen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLight {
    pub device_id: DeviceId,
    pub status: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_light_projection_drops_heartbeat() {
        let now = Utc::now();
        let device = Device {
            device_id: DeviceId::from("dev-1"),
            status: true,
            last_seen: Some(now),
            heartbeat: Some(json!({"battery": 85})),
            app_id: Some("app-1".to_string()),
        };

        let light = serde_json::to_value(device.light()).unwrap();
        assert_eq!(light["device_id"], "dev-1");
        assert_eq!(light["status"], true);
        assert!(light.get("heartbeat").is_none());
        assert!(light.get("app_id").is_none());
    }
}
