//! Runtime-togglable relay behaviour, polled from the shared config record

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{Error, Result};

/// Immutable snapshot; replaced wholesale on every successful poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub relay_enabled: bool,
    pub stale_check_enabled: bool,
    pub alt_source_enabled: bool,
    pub high_scale_mode: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            relay_enabled: true,
            stale_check_enabled: true,
            alt_source_enabled: false,
            high_scale_mode: false,
        }
    }
}

/// Partial record as stored; absent keys leave the previous value untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfigPatch {
    pub relay_enabled: Option<bool>,
    pub stale_check_enabled: Option<bool>,
    pub alt_source_enabled: Option<bool>,
    pub high_scale_mode: Option<bool>,
}

impl RuntimeConfigPatch {
    /// Read a stored record. Keys may be camelCase or snake_case; when both
    /// spellings are present the camelCase one wins. Unknown keys are ignored
    /// and a non-boolean value leaves its flag unset.
    pub fn from_record(record: &JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = record else {
            return Err(Error::InvalidInput(format!("runtime config record must be an object, got {record}")));
        };

        let flag = |camel: &str, snake: &str| {
            [camel, snake].into_iter().find_map(|key| match map.get(key)? {
                JsonValue::Bool(value) => Some(*value),
                other => {
                    warn!(key, value = %other, "Ignoring non-boolean runtime config value");
                    None
                }
            })
        };

        Ok(Self {
            relay_enabled: flag("relayEnabled", "relay_enabled"),
            stale_check_enabled: flag("staleCheckEnabled", "stale_check_enabled"),
            alt_source_enabled: flag("altSourceEnabled", "alt_source_enabled"),
            high_scale_mode: flag("highScaleMode", "high_scale_mode"),
        })
    }
}

impl RuntimeConfig {
    /// Overlay a partial record on this snapshot
    #[must_use]
    pub fn merge(&self, patch: &RuntimeConfigPatch) -> Self {
        Self {
            relay_enabled: patch.relay_enabled.unwrap_or(self.relay_enabled),
            stale_check_enabled: patch.stale_check_enabled.unwrap_or(self.stale_check_enabled),
            alt_source_enabled: patch.alt_source_enabled.unwrap_or(self.alt_source_enabled),
            high_scale_mode: patch.high_scale_mode.unwrap_or(self.high_scale_mode),
        }
    }

    /// Apply the environment emergency brake
    #[must_use]
    pub const fn with_forced_high_scale(mut self, forced: bool) -> Self {
        if forced {
            self.high_scale_mode = true;
        }
        self
    }
}
