//! Presence backend selection

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::presence::{PresenceIndex, RedisPresenceBackend};
use crate::Config;

/// Redis-backed presence when Redis is configured, in-process otherwise.
///
/// Purges existing keys when `presence.clear_on_startup` is set.
pub async fn init_presence(config: &Config) -> Result<PresenceIndex> {
    let ttl = config.presence.ttl();

    let index = if config.redis.url.is_empty() {
        warn!("Redis not configured, presence is process-local (single-node mode)");
        PresenceIndex::in_memory(ttl)
    } else {
        let backend = RedisPresenceBackend::connect(&config.redis.url, &config.redis.key_prefix, ttl)
            .await
            .context("Failed to connect presence backend to Redis")?;
        info!(ttl_seconds = config.presence.ttl_seconds, "Presence index backed by Redis");
        PresenceIndex::new(Arc::new(backend))
    };

    if config.presence.clear_on_startup {
        index.clear_all().await;
    }

    Ok(index)
}
