use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use crate::Result;

/// Where the shared runtime config record lives
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RuntimeConfigSource: Send + Sync {
    /// `Ok(None)` when the record does not exist
    async fn fetch(&self, key: &str) -> Result<Option<JsonValue>>;
}

/// Reads `app_config.value` for a key
#[derive(Clone)]
pub struct PgRuntimeConfigSource {
    pool: PgPool,
}

impl PgRuntimeConfigSource {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuntimeConfigSource for PgRuntimeConfigSource {
    async fn fetch(&self, key: &str) -> Result<Option<JsonValue>> {
        let row = sqlx::query("SELECT value FROM app_config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.try_get("value")).transpose()?)
    }
}
