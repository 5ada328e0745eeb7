//! Short-window deduplication of cluster events
//!
//! Drops replays of the same `event_id` (publisher retries after reconnect,
//! overlapping subscriptions).

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Message deduplicator with automatic cleanup
#[derive(Clone)]
pub struct MessageDeduplicator {
    /// event_id -> expiry
    entries: Arc<DashMap<String, Instant>>,
    dedup_window: Duration,
    cancel_token: CancellationToken,
}

impl MessageDeduplicator {
    /// Create a deduplicator and spawn its cleanup task. Requires a Tokio runtime.
    #[must_use]
    pub fn new(dedup_window: Duration, cleanup_interval: Duration) -> Self {
        let dedup = Self {
            entries: Arc::new(DashMap::new()),
            dedup_window,
            cancel_token: CancellationToken::new(),
        };

        let dedup_clone = dedup.clone();
        tokio::spawn(async move {
            dedup_clone.run_cleanup(cleanup_interval).await;
        });

        dedup
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }

    /// `true` the first time an id is seen within the window
    #[must_use]
    pub fn should_process(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let mut fresh = true;
        self.entries
            .entry(event_id.to_string())
            .and_modify(|expires_at| {
                if *expires_at > now {
                    fresh = false;
                } else {
                    *expires_at = now + self.dedup_window;
                }
            })
            .or_insert(now + self.dedup_window);
        fresh
    }

    async fn run_cleanup(&self, cleanup_interval: Duration) {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => return,
                _ = interval.tick() => self.cleanup_expired(),
            }
        }
    }

    fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, expires_at| *expires_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop the cleanup task
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_ids_dropped() {
        let dedup = MessageDeduplicator::with_defaults();

        assert!(dedup.should_process("evt-1"));
        assert!(!dedup.should_process("evt-1"));
        assert!(dedup.should_process("evt-2"));
        assert_eq!(dedup.len(), 2);
        dedup.shutdown();
    }

    #[tokio::test]
    async fn test_id_accepted_again_after_window() {
        let dedup = MessageDeduplicator::new(Duration::from_millis(20), Duration::from_secs(30));

        assert!(dedup.should_process("evt-1"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(dedup.should_process("evt-1"));
        assert!(!dedup.should_process("evt-1"));
        dedup.shutdown();
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let dedup = MessageDeduplicator::new(Duration::from_millis(10), Duration::from_secs(30));
        assert!(dedup.should_process("evt-1"));
        std::thread::sleep(Duration::from_millis(30));

        dedup.cleanup_expired();
        assert!(dedup.is_empty());
        dedup.shutdown();
    }
}
