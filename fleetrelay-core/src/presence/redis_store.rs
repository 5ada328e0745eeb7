use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;

use super::PresenceBackend;
use crate::{Error, Result};

const SCAN_BATCH: usize = 500;

/// Presence keys shared by every relay process: `{prefix}presence:{device_id}`
#[derive(Clone)]
pub struct RedisPresenceBackend {
    conn: ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisPresenceBackend {
    pub async fn connect(redis_url: &str, key_prefix: &str, ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| Error::Internal(format!("Invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn, key_prefix, ttl))
    }

    #[must_use]
    pub fn with_connection(conn: ConnectionManager, key_prefix: &str, ttl: Duration) -> Self {
        Self {
            conn,
            key_prefix: format!("{key_prefix}presence:"),
            ttl_seconds: ttl.as_secs().max(1),
        }
    }

    fn key(&self, device_id: &str) -> String {
        format!("{}{device_id}", self.key_prefix)
    }
}

#[async_trait]
impl PresenceBackend for RedisPresenceBackend {
    async fn set(&self, device_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(self.key(device_id), 1, self.ttl_seconds).await?;
        Ok(())
    }

    async fn delete(&self, device_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(device_id)).await?;
        Ok(())
    }

    async fn exists(&self, device_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.key(device_id)).await?)
    }

    async fn exists_many(&self, device_ids: &[String]) -> Result<Vec<bool>> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = device_ids.iter().map(|id| self.key(id)).collect();
        let mut conn = self.conn.clone();
        // explicit MGET: a single key must still come back as an array
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
        Ok(values.into_iter().map(|v| v.is_some()).collect())
    }

    async fn purge(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}
