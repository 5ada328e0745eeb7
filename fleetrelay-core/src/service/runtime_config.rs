//! Copy-on-write holder for the current [`RuntimeConfig`] snapshot

use std::sync::Arc;
use tokio::sync::watch;

use crate::models::RuntimeConfig;

/// Write side; owned by the config sync routine only
#[derive(Debug)]
pub struct RuntimeConfigCell {
    tx: watch::Sender<Arc<RuntimeConfig>>,
}

impl RuntimeConfigCell {
    #[must_use]
    pub fn new(initial: RuntimeConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    #[must_use]
    pub fn handle(&self) -> RuntimeConfigHandle {
        RuntimeConfigHandle {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<RuntimeConfig> {
        self.tx.borrow().clone()
    }

    /// Publish a new snapshot, returning the one it replaced
    pub fn replace(&self, next: RuntimeConfig) -> Arc<RuntimeConfig> {
        self.tx.send_replace(Arc::new(next))
    }
}

impl Default for RuntimeConfigCell {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// Read side; cheap to clone, never observes a half-applied update
#[derive(Debug, Clone)]
pub struct RuntimeConfigHandle {
    rx: watch::Receiver<Arc<RuntimeConfig>>,
}

impl RuntimeConfigHandle {
    /// Fixed handle for tests and tools that never poll
    #[must_use]
    pub fn fixed(config: RuntimeConfig) -> Self {
        RuntimeConfigCell::new(config).handle()
    }

    #[must_use]
    pub fn current(&self) -> Arc<RuntimeConfig> {
        self.rx.borrow().clone()
    }
}
