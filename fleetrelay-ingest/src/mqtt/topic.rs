use fleetrelay_core::models::DeviceId;

use crate::{IngestError, Result};

const ROOT: &str = "devices";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// `devices/{id}/status`, payload `online`/`offline`
    Status,
    /// `devices/{id}/sms/new`, JSON message object
    SmsNew,
    /// `devices/{id}/telemetry`, JSON telemetry object
    Telemetry,
}

impl TopicKind {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::SmsNew => "sms/new",
            Self::Telemetry => "telemetry",
        }
    }
}

/// Parsed `devices/{device_id}/{status|sms/new|telemetry}` topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopic {
    pub device_id: DeviceId,
    pub kind: TopicKind,
}

/// Filters the bridge subscribes to, one per topic kind
#[must_use]
pub fn subscription_filters() -> [String; 3] {
    [TopicKind::Status, TopicKind::SmsNew, TopicKind::Telemetry]
        .map(|kind| format!("{ROOT}/+/{}", kind.suffix()))
}

pub fn parse_topic(topic: &str) -> Result<DeviceTopic> {
    let invalid = || IngestError::InvalidTopic(topic.to_string());

    let rest = topic
        .strip_prefix(ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(invalid)?;
    let (device_id, suffix) = rest.split_once('/').ok_or_else(invalid)?;

    if device_id.trim().is_empty() || device_id.contains(['+', '#']) {
        return Err(invalid());
    }

    let kind = match suffix {
        "status" => TopicKind::Status,
        "sms/new" => TopicKind::SmsNew,
        "telemetry" => TopicKind::Telemetry,
        _ => return Err(invalid()),
    };

    Ok(DeviceTopic {
        device_id: DeviceId::from(device_id),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_kind() {
        let parsed = parse_topic("devices/dev-1/status").unwrap();
        assert_eq!(parsed.device_id.as_str(), "dev-1");
        assert_eq!(parsed.kind, TopicKind::Status);

        assert_eq!(parse_topic("devices/dev-1/sms/new").unwrap().kind, TopicKind::SmsNew);
        assert_eq!(parse_topic("devices/dev-1/telemetry").unwrap().kind, TopicKind::Telemetry);
    }

    #[test]
    fn test_parse_rejects_other_layouts() {
        assert!(parse_topic("devices/dev-1").is_err());
        assert!(parse_topic("devices//status").is_err());
        assert!(parse_topic("devices/dev-1/sms").is_err());
        assert!(parse_topic("devices/dev-1/telemetry/extra").is_err());
        assert!(parse_topic("other/dev-1/status").is_err());
        assert!(parse_topic("").is_err());
    }

    #[test]
    fn test_subscription_filters() {
        assert_eq!(
            subscription_filters(),
            [
                "devices/+/status".to_string(),
                "devices/+/sms/new".to_string(),
                "devices/+/telemetry".to_string(),
            ]
        );
    }
}
