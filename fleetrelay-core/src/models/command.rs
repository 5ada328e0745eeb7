use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use super::{CommandId, DeviceId};

/// Command status. Forward-only; `cancelled` is reachable from `pending` and `processing` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    #[default]
    Pending,
    Delivered,
    Processing,
    Executed,
    Failed,
    Cancelled,
}

impl CommandStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Processing => "processing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        use CommandStatus::{Cancelled, Delivered, Executed, Failed, Pending, Processing};
        matches!(
            (self, next),
            (Pending, Delivered | Processing | Failed | Cancelled)
                | (Delivered, Processing | Executed | Failed)
                | (Processing, Executed | Failed | Cancelled)
        )
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "processing" => Ok(Self::Processing),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("Unknown command status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub device_id: DeviceId,
    pub command_type: String,
    pub payload: JsonValue,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Command {
    #[must_use]
    pub fn new(device_id: DeviceId, command_type: String, payload: JsonValue) -> Self {
        Self {
            id: CommandId::new(),
            device_id,
            command_type,
            payload,
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            delivered_at: None,
            executed_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommandRequest {
    pub command_type: String,
    #[serde(default)]
    pub payload: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCommandStatusRequest {
    pub status: CommandStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(CommandStatus::Pending.can_transition_to(CommandStatus::Delivered));
        assert!(CommandStatus::Delivered.can_transition_to(CommandStatus::Executed));
        assert!(CommandStatus::Pending.can_transition_to(CommandStatus::Failed));
        assert!(CommandStatus::Processing.can_transition_to(CommandStatus::Executed));
    }

    #[test]
    fn test_cancel_only_from_pending_or_processing() {
        assert!(CommandStatus::Pending.can_transition_to(CommandStatus::Cancelled));
        assert!(CommandStatus::Processing.can_transition_to(CommandStatus::Cancelled));
        assert!(!CommandStatus::Delivered.can_transition_to(CommandStatus::Cancelled));
        assert!(!CommandStatus::Executed.can_transition_to(CommandStatus::Cancelled));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let all = [
            CommandStatus::Pending,
            CommandStatus::Delivered,
            CommandStatus::Processing,
            CommandStatus::Executed,
            CommandStatus::Failed,
            CommandStatus::Cancelled,
        ];
        for terminal in all.iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|next| !terminal.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_no_backwards_transitions() {
        assert!(!CommandStatus::Delivered.can_transition_to(CommandStatus::Pending));
        assert!(!CommandStatus::Processing.can_transition_to(CommandStatus::Delivered));
        assert!(!CommandStatus::Pending.can_transition_to(CommandStatus::Pending));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("processing".parse::<CommandStatus>(), Ok(CommandStatus::Processing));
        assert!("done".parse::<CommandStatus>().is_err());
    }
}
