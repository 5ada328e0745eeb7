//! Room naming for dashboard subscriptions

use fleetrelay_core::models::DeviceId;
use serde::{Deserialize, Serialize};

const GLOBAL: &str = "global";
const ADMIN_DASHBOARD: &str = "admin-dashboard";
const ADMIN_MESSAGES: &str = "admin-messages";
const COMMAND_FEED: &str = "command-feed";
const DEVICE_PREFIX: &str = "device-";
const COMMANDS_PREFIX: &str = "commands-";

/// A named multicast group; only the shapes below are valid
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    /// Every dashboard connection is implicitly a member
    #[must_use]
    pub fn global() -> Self {
        Self(GLOBAL.to_string())
    }

    #[must_use]
    pub fn device(device_id: &DeviceId) -> Self {
        Self(format!("{DEVICE_PREFIX}{device_id}"))
    }

    #[must_use]
    pub fn commands(device_id: &DeviceId) -> Self {
        Self(format!("{COMMANDS_PREFIX}{device_id}"))
    }

    #[must_use]
    pub fn admin_dashboard() -> Self {
        Self(ADMIN_DASHBOARD.to_string())
    }

    #[must_use]
    pub fn admin_messages() -> Self {
        Self(ADMIN_MESSAGES.to_string())
    }

    #[must_use]
    pub fn command_feed() -> Self {
        Self(COMMAND_FEED.to_string())
    }

    /// Validate a client-supplied room name
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = match raw {
            GLOBAL | ADMIN_DASHBOARD | ADMIN_MESSAGES | COMMAND_FEED => true,
            _ => [DEVICE_PREFIX, COMMANDS_PREFIX].iter().any(|prefix| {
                raw.strip_prefix(prefix)
                    .is_some_and(|id| !id.is_empty() && !id.contains(char::is_whitespace))
            }),
        };
        valid.then(|| Self(raw.to_string()))
    }

    /// Rooms that require the admin role to join
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        matches!(self.0.as_str(), ADMIN_DASHBOARD | ADMIN_MESSAGES | COMMAND_FEED)
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_scoped_rooms() {
        let id = DeviceId::from("dev-1");
        assert_eq!(RoomName::device(&id).as_str(), "device-dev-1");
        assert_eq!(RoomName::commands(&id).as_str(), "commands-dev-1");
    }

    #[test]
    fn test_parse() {
        assert_eq!(RoomName::parse("device-dev-1"), Some(RoomName::device(&DeviceId::from("dev-1"))));
        assert_eq!(RoomName::parse("admin-dashboard"), Some(RoomName::admin_dashboard()));
        assert!(RoomName::parse("device-").is_none());
        assert!(RoomName::parse("lobby").is_none());
        assert!(RoomName::parse("commands-a b").is_none());
    }

    #[test]
    fn test_privileged_rooms() {
        assert!(RoomName::admin_dashboard().is_privileged());
        assert!(RoomName::admin_messages().is_privileged());
        assert!(RoomName::command_feed().is_privileged());
        assert!(!RoomName::global().is_privileged());
        assert!(!RoomName::device(&DeviceId::from("admin-dashboard")).is_privileged());
    }
}
