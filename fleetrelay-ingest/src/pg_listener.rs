//! Postgres change feed: `LISTEN` on the channels fed by the table triggers

use std::sync::Arc;
use std::time::Duration;

use fleetrelay_core::metrics;
use fleetrelay_core::models::{ChangeType, DeviceId, EventEnvelope, EventKind};
use fleetrelay_core::EventSink;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{IngestError, Result};

pub const MESSAGES_CHANNEL: &str = "fleetrelay_messages";
pub const DEVICES_CHANNEL: &str = "fleetrelay_devices";
pub const KEYLOGS_CHANNEL: &str = "fleetrelay_keylogs";

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Trigger payload: `{"type": "...", "record": {...}, "old_record": {...}|null}`,
/// or `{"type": "...", "truncated": true, "device_id": "...", "id": ...}` when the row
/// did not fit in a NOTIFY
#[derive(Debug, Deserialize)]
struct ChangeNotification {
    #[serde(rename = "type")]
    change: String,
    #[serde(default)]
    record: Option<JsonValue>,
    #[serde(default)]
    old_record: Option<JsonValue>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    id: Option<i64>,
}

/// A decoded notification
#[derive(Debug)]
pub enum ChangeNotice {
    Row(EventEnvelope),
    /// Row too large for NOTIFY; only its key arrived and it must be read back
    Truncated(RowRef),
}

/// Key of a row whose notification was truncated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    pub kind: EventKind,
    pub change: ChangeType,
    pub device_id: DeviceId,
    /// Serial id for message and keylog rows; devices are keyed by `device_id`
    pub id: Option<i64>,
}

impl RowRef {
    fn lookup(&self) -> Result<(&'static str, &'static str)> {
        match (self.kind, self.id) {
            (EventKind::DeviceChange, _) => Ok(("devices", "device_id")),
            (EventKind::MessageChange, Some(_)) => Ok(("messages", "id")),
            (EventKind::KeylogChange, Some(_)) => Ok(("keylogs", "id")),
            _ => Err(IngestError::InvalidPayload(format!(
                "truncated {} notification without a row id",
                self.kind.as_str()
            ))),
        }
    }

    /// Read the current row back; `None` when it no longer exists
    pub async fn fetch(&self, pool: &PgPool) -> Result<Option<EventEnvelope>> {
        let (table, key) = self.lookup()?;
        let sql = format!("SELECT to_jsonb(t) FROM {table} t WHERE t.{key} = $1");
        let query = sqlx::query_scalar::<_, JsonValue>(&sql);
        let row = match self.id {
            Some(id) if key == "id" => query.bind(id).fetch_optional(pool).await?,
            _ => query.bind(self.device_id.as_str()).fetch_optional(pool).await?,
        };
        Ok(row.map(|row| EventEnvelope::new(self.kind, self.change, self.device_id.clone(), Some(row))))
    }
}

fn kind_for_channel(channel: &str) -> Option<EventKind> {
    match channel {
        MESSAGES_CHANNEL => Some(EventKind::MessageChange),
        DEVICES_CHANNEL => Some(EventKind::DeviceChange),
        KEYLOGS_CHANNEL => Some(EventKind::KeylogChange),
        _ => None,
    }
}

/// Decode one NOTIFY
pub fn parse_notification(channel: &str, payload: &str) -> Result<ChangeNotice> {
    let kind = kind_for_channel(channel)
        .ok_or_else(|| IngestError::InvalidPayload(format!("unknown channel {channel}")))?;
    let notification: ChangeNotification = serde_json::from_str(payload)?;
    let change = ChangeType::parse(&notification.change).ok_or_else(|| {
        IngestError::InvalidPayload(format!("unknown change type {}", notification.change))
    })?;

    if notification.truncated {
        let device_id = notification
            .device_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IngestError::InvalidPayload("truncated row has no device_id".to_string()))?;
        let row = RowRef {
            kind,
            change,
            device_id: DeviceId::from(device_id),
            id: notification.id,
        };
        row.lookup()?;
        return Ok(ChangeNotice::Truncated(row));
    }

    let record = notification.record.filter(|r| !r.is_null());
    let old_record = notification.old_record.filter(|r| !r.is_null());

    let device_id = record
        .as_ref()
        .or(old_record.as_ref())
        .and_then(|row| row.get("device_id"))
        .and_then(JsonValue::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| IngestError::InvalidPayload("row has no device_id".to_string()))?;

    Ok(ChangeNotice::Row(
        EventEnvelope::new(kind, change, DeviceId::from(device_id), record).with_old(old_record),
    ))
}

/// Always-on relational change feed
pub struct PgChangeListener {
    pool: PgPool,
    sink: Arc<dyn EventSink>,
}

impl PgChangeListener {
    pub fn new(pool: PgPool, sink: Arc<dyn EventSink>) -> Self {
        Self { pool, sink }
    }

    /// Listen until cancelled. Connection loss is retried; a bad notification is dropped.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let mut listener = match self.connect().await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(error = %e, "Failed to start Postgres change listener, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RETRY_DELAY) => continue,
                    }
                }
            };
            info!("Postgres change listener started");

            loop {
                let notification = tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Postgres change listener stopped");
                        return;
                    }
                    notification = listener.recv() => notification,
                };

                match notification {
                    Ok(notification) => self.handle(notification.channel(), notification.payload()).await,
                    Err(e) => {
                        // recv reconnects on its own; an error here means that failed too
                        warn!(error = %e, "Postgres change listener lost its connection");
                        break;
                    }
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(RETRY_DELAY) => {}
            }
        }
        info!("Postgres change listener stopped");
    }

    async fn connect(&self) -> Result<PgListener> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all([MESSAGES_CHANNEL, DEVICES_CHANNEL, KEYLOGS_CHANNEL])
            .await?;
        Ok(listener)
    }

    async fn handle(&self, channel: &str, payload: &str) {
        let envelope = match parse_notification(channel, payload) {
            Ok(ChangeNotice::Row(envelope)) => Some(envelope),
            Ok(ChangeNotice::Truncated(row)) => match row.fetch(&self.pool).await {
                Ok(Some(envelope)) => {
                    debug!(channel, device_id = %row.device_id, "Read back oversized change row");
                    Some(envelope)
                }
                Ok(None) => {
                    debug!(channel, device_id = %row.device_id, "Oversized change row is gone");
                    return;
                }
                Err(e) => {
                    warn!(channel, device_id = %row.device_id, error = %e, "Failed to read back oversized change row");
                    None
                }
            },
            Err(e) => {
                warn!(channel, error = %e, "Dropping malformed change notification");
                None
            }
        };

        match envelope {
            Some(envelope) => {
                debug!(channel, device_id = %envelope.device_id, "Change feed event");
                metrics::adapters::EVENTS_TOTAL
                    .with_label_values(&["pg", "relayed"])
                    .inc();
                self.sink.emit(envelope);
            }
            None => {
                metrics::adapters::EVENTS_TOTAL
                    .with_label_values(&["pg", "error"])
                    .inc();
            }
        }
    }
}
