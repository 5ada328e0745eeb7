use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, PgPool, Row};

use super::relay_origin_tx;
use crate::{
    models::{Device, DeviceId},
    Result,
};

const DEVICE_COLUMNS: &str = "device_id, status, last_seen, heartbeat, app_id";

/// Device state writes made by adapters and the stale sweeper
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Create the device on first contact or update its online flag.
    /// `last_seen` only moves forward on an online signal.
    async fn upsert_status(&self, device_id: &DeviceId, online: bool, seen_at: DateTime<Utc>) -> Result<Device>;

    /// Merge telemetry fields into the stored blob (last write wins per field) and mark the device online
    async fn record_heartbeat(&self, device_id: &DeviceId, heartbeat: JsonValue, seen_at: DateTime<Utc>) -> Result<Device>;

    /// Flip every online device last seen before `cutoff` to offline, returning each flipped row once
    async fn flip_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<Vec<Device>>;
}

#[derive(Clone)]
pub struct PgDeviceStore {
    pool: PgPool,
}

impl PgDeviceStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_device(row: &PgRow) -> Result<Device> {
        Ok(Device {
            device_id: row.try_get("device_id")?,
            status: row.try_get("status")?,
            last_seen: row.try_get("last_seen")?,
            heartbeat: row.try_get("heartbeat")?,
            app_id: row.try_get("app_id")?,
        })
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn upsert_status(&self, device_id: &DeviceId, online: bool, seen_at: DateTime<Utc>) -> Result<Device> {
        let mut tx = relay_origin_tx(&self.pool).await?;
        let row = sqlx::query(&format!(
            "INSERT INTO devices (device_id, status, last_seen)
             VALUES ($1, $2, $3)
             ON CONFLICT (device_id) DO UPDATE
             SET status = EXCLUDED.status,
                 last_seen = CASE WHEN EXCLUDED.status THEN EXCLUDED.last_seen ELSE devices.last_seen END,
                 updated_at = NOW()
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(device_id)
        .bind(online)
        .bind(seen_at)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::row_to_device(&row)
    }

    async fn record_heartbeat(&self, device_id: &DeviceId, heartbeat: JsonValue, seen_at: DateTime<Utc>) -> Result<Device> {
        let mut tx = relay_origin_tx(&self.pool).await?;
        let row = sqlx::query(&format!(
            "INSERT INTO devices (device_id, status, last_seen, heartbeat)
             VALUES ($1, TRUE, $2, $3)
             ON CONFLICT (device_id) DO UPDATE
             SET status = TRUE,
                 last_seen = EXCLUDED.last_seen,
                 heartbeat = CASE
                     WHEN jsonb_typeof(devices.heartbeat) = 'object' THEN devices.heartbeat || EXCLUDED.heartbeat
                     ELSE EXCLUDED.heartbeat
                 END,
                 updated_at = NOW()
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(device_id)
        .bind(seen_at)
        .bind(heartbeat)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::row_to_device(&row)
    }

    async fn flip_stale_offline(&self, cutoff: DateTime<Utc>) -> Result<Vec<Device>> {
        let mut tx = relay_origin_tx(&self.pool).await?;
        // the status predicate makes concurrent sweeps on other nodes skip rows already flipped
        let rows = sqlx::query(&format!(
            "UPDATE devices
             SET status = FALSE, updated_at = NOW()
             WHERE status = TRUE AND last_seen < $1
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        rows.iter().map(Self::row_to_device).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_pool;
    use serde_json::json;

    fn fresh_device() -> DeviceId {
        DeviceId::from(format!("test-{}", nanoid::nanoid!(10)))
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_record_heartbeat_merges_fields() {
        let store = PgDeviceStore::new(test_pool().await);
        let device = fresh_device();

        store
            .record_heartbeat(&device, json!({"battery": 80, "signal": -70}), Utc::now())
            .await
            .unwrap();
        let merged = store
            .record_heartbeat(&device, json!({"battery": 79, "charging": true}), Utc::now())
            .await
            .unwrap();

        assert!(merged.status);
        assert_eq!(
            merged.heartbeat,
            Some(json!({"battery": 79, "signal": -70, "charging": true}))
        );
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_offline_keeps_last_seen() {
        let store = PgDeviceStore::new(test_pool().await);
        let device = fresh_device();
        let seen_at = Utc::now() - chrono::Duration::minutes(1);

        let online = store.upsert_status(&device, true, seen_at).await.unwrap();
        let offline = store.upsert_status(&device, false, Utc::now()).await.unwrap();

        assert!(!offline.status);
        assert_eq!(offline.last_seen, online.last_seen);
    }
}
