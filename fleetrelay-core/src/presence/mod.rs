//! TTL-backed online/offline index
//!
//! Presence is advisory: backend failures are logged and counted, writes are
//! dropped and reads degrade to "offline".

mod memory;
mod redis_store;

pub use memory::MemoryPresenceBackend;
pub use redis_store::RedisPresenceBackend;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{metrics, models::DeviceId, Result};

/// Storage for presence keys. Keys expire on their own after the backend's TTL.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PresenceBackend: Send + Sync {
    /// Set or refresh the key with a full TTL
    async fn set(&self, device_id: &str) -> Result<()>;

    async fn delete(&self, device_id: &str) -> Result<()>;

    async fn exists(&self, device_id: &str) -> Result<bool>;

    /// One flag per input, in input order, fetched in a single round trip
    async fn exists_many(&self, device_ids: &[String]) -> Result<Vec<bool>>;

    /// Remove every presence key; returns how many were removed
    async fn purge(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct PresenceIndex {
    backend: Arc<dyn PresenceBackend>,
}

impl std::fmt::Debug for PresenceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceIndex").finish_non_exhaustive()
    }
}

impl PresenceIndex {
    pub fn new(backend: Arc<dyn PresenceBackend>) -> Self {
        Self { backend }
    }

    /// In-process index for single-node deployments and tests
    #[must_use]
    pub fn in_memory(ttl: std::time::Duration) -> Self {
        Self::new(Arc::new(MemoryPresenceBackend::new(ttl)))
    }

    pub async fn mark_online(&self, device_id: &DeviceId) {
        if let Err(e) = self.backend.set(device_id.as_str()).await {
            record_failure("mark_online", device_id, &e);
        }
    }

    pub async fn mark_offline(&self, device_id: &DeviceId) {
        if let Err(e) = self.backend.delete(device_id.as_str()).await {
            record_failure("mark_offline", device_id, &e);
        }
    }

    pub async fn is_online(&self, device_id: &DeviceId) -> bool {
        match self.backend.exists(device_id.as_str()).await {
            Ok(online) => online,
            Err(e) => {
                record_failure("is_online", device_id, &e);
                false
            }
        }
    }

    /// Exactly one entry per distinct input id; unknown ids and backend failures read as offline
    pub async fn get_statuses(&self, device_ids: &[DeviceId]) -> HashMap<DeviceId, bool> {
        let mut statuses: HashMap<DeviceId, bool> =
            device_ids.iter().map(|id| (id.clone(), false)).collect();
        if device_ids.is_empty() {
            return statuses;
        }

        let keys: Vec<String> = device_ids.iter().map(|id| id.as_str().to_string()).collect();
        match self.backend.exists_many(&keys).await {
            Ok(flags) => {
                for (id, online) in device_ids.iter().zip(flags) {
                    if online {
                        statuses.insert(id.clone(), true);
                    }
                }
            }
            Err(e) => {
                metrics::presence::BACKEND_ERRORS
                    .with_label_values(&["get_statuses"])
                    .inc();
                warn!(error = %e, count = device_ids.len(), "Presence bulk read failed, reporting all offline");
            }
        }
        statuses
    }

    /// Startup-only purge so presence does not outlive a process restart
    pub async fn clear_all(&self) {
        match self.backend.purge().await {
            Ok(removed) => debug!(removed, "Presence index cleared"),
            Err(e) => {
                metrics::presence::BACKEND_ERRORS
                    .with_label_values(&["clear_all"])
                    .inc();
                warn!(error = %e, "Failed to clear presence index");
            }
        }
    }
}

fn record_failure(op: &str, device_id: &DeviceId, error: &crate::Error) {
    metrics::presence::BACKEND_ERRORS.with_label_values(&[op]).inc();
    warn!(device_id = %device_id, op, error = %error, "Presence backend operation failed");
}
