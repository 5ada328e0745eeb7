use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

use super::PresenceBackend;
use crate::Result;

/// Process-local presence store with a fixed time-to-live per key
#[derive(Clone)]
pub struct MemoryPresenceBackend {
    cache: Cache<String, ()>,
}

impl MemoryPresenceBackend {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }
}

#[async_trait]
impl PresenceBackend for MemoryPresenceBackend {
    async fn set(&self, device_id: &str) -> Result<()> {
        // re-inserting resets the time-to-live clock
        self.cache.insert(device_id.to_string(), ()).await;
        Ok(())
    }

    async fn delete(&self, device_id: &str) -> Result<()> {
        self.cache.invalidate(device_id).await;
        Ok(())
    }

    async fn exists(&self, device_id: &str) -> Result<bool> {
        Ok(self.cache.get(device_id).await.is_some())
    }

    async fn exists_many(&self, device_ids: &[String]) -> Result<Vec<bool>> {
        let mut flags = Vec::with_capacity(device_ids.len());
        for id in device_ids {
            flags.push(self.cache.get(id).await.is_some());
        }
        Ok(flags)
    }

    async fn purge(&self) -> Result<u64> {
        self.cache.run_pending_tasks().await;
        let removed = self.cache.entry_count();
        self.cache.invalidate_all();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_expires_after_ttl() {
        let backend = MemoryPresenceBackend::new(Duration::from_millis(50));
        backend.set("dev-1").await.unwrap();
        assert!(backend.exists("dev-1").await.unwrap());

        std::thread::sleep(Duration::from_millis(120));
        assert!(!backend.exists("dev-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_many_preserves_order() {
        let backend = MemoryPresenceBackend::new(Duration::from_secs(60));
        backend.set("b").await.unwrap();

        let flags = backend
            .exists_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_purge_counts_removed_keys() {
        let backend = MemoryPresenceBackend::new(Duration::from_secs(60));
        backend.set("a").await.unwrap();
        backend.set("b").await.unwrap();

        assert_eq!(backend.purge().await.unwrap(), 2);
        assert!(!backend.exists("a").await.unwrap());
    }
}
