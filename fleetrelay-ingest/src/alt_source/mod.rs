//! Hierarchical-database listener
//!
//! Watches the `messages`, `status` and `heartbeat` subtrees while
//! `altSourceEnabled` is on. Listeners are billed per connection upstream, so
//! `start`/`stop` must be exactly reversible: one task per subtree while
//! active, none otherwise.

mod firebase;
mod sse;

pub use firebase::FirebaseSource;
pub use sse::{SseDecoder, SseEvent};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fleetrelay_core::metrics;
use fleetrelay_core::models::DeviceId;

use crate::signals::DeviceSignals;
use crate::Result;

/// A change under a watched subtree; `path` is relative to the subtree root
#[derive(Debug, Clone, PartialEq)]
pub struct TreeChange {
    pub path: String,
    pub data: JsonValue,
    /// `data` holds only the changed children of `path`
    pub patch: bool,
}

#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Open a change stream; the first item is usually a snapshot of the whole subtree
    async fn subscribe(&self, subtree: &str) -> Result<BoxStream<'static, Result<TreeChange>>>;

    /// The last child (by key) under `path`, if any
    async fn latest_child(&self, path: &str) -> Result<Option<(String, JsonValue)>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtree {
    Messages,
    Status,
    Heartbeat,
}

impl Subtree {
    pub const ALL: [Self; 3] = [Self::Messages, Self::Status, Self::Heartbeat];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Status => "status",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// `true` and `"online"` are online, anything else is offline
#[must_use]
pub fn reduce_status(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(online) => *online,
        JsonValue::String(s) => s == "online",
        _ => false,
    }
}

#[derive(Clone)]
struct SubtreeWatcher {
    source: Arc<dyn TreeSource>,
    signals: Arc<DeviceSignals>,
    reconnect_delay: Duration,
}

impl SubtreeWatcher {
    async fn run(self, subtree: Subtree, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                result = self.watch(subtree) => match result {
                    Ok(()) => warn!(subtree = subtree.as_str(), "Hierarchical database stream ended, reconnecting"),
                    Err(e) => warn!(subtree = subtree.as_str(), error = %e, "Hierarchical database stream failed, reconnecting"),
                },
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn watch(&self, subtree: Subtree) -> Result<()> {
        let mut changes = self.source.subscribe(subtree.as_str()).await?;
        info!(subtree = subtree.as_str(), "Attached hierarchical database listener");

        let mut first = true;
        while let Some(change) = changes.next().await {
            let change = change?;
            // the opening put is the current state, not a change
            let snapshot = first && !change.patch && change.path.trim_matches('/').is_empty();
            first = false;
            if snapshot {
                continue;
            }
            self.handle_change(subtree, change).await;
        }
        Ok(())
    }

    async fn handle_change(&self, subtree: Subtree, change: TreeChange) {
        let segments: Vec<&str> = change.path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.split_first() {
            // root-level write: one entry per device
            None => {
                if let JsonValue::Object(children) = change.data {
                    for (device, data) in children {
                        self.apply(subtree, &DeviceId::from(device), &[], data).await;
                    }
                }
            }
            Some((device, rest)) => {
                self.apply(subtree, &DeviceId::from(*device), rest, change.data).await;
            }
        }
    }

    async fn apply(&self, subtree: Subtree, device_id: &DeviceId, rest: &[&str], data: JsonValue) {
        match subtree {
            Subtree::Status => {
                if !rest.is_empty() {
                    debug!(device_id = %device_id, "Ignoring nested status write");
                    return;
                }
                self.signals.status(device_id, reduce_status(&data)).await;
            }
            Subtree::Heartbeat => {
                if data.is_null() {
                    return;
                }
                let telemetry = match rest.last() {
                    None => data,
                    Some(key) => {
                        let mut map = Map::new();
                        map.insert((*key).to_string(), data);
                        JsonValue::Object(map)
                    }
                };
                self.signals.telemetry(device_id, telemetry).await;
            }
            Subtree::Messages => {
                if data.is_null() {
                    return;
                }
                let parent = format!("{}/{}", Subtree::Messages.as_str(), device_id);
                match self.source.latest_child(&parent).await {
                    Ok(Some((key, value))) => {
                        let row = match value {
                            JsonValue::Object(mut map) => {
                                map.entry("id").or_insert(JsonValue::String(key));
                                JsonValue::Object(map)
                            }
                            other => serde_json::json!({ "id": key, "body": other }),
                        };
                        self.signals.message(device_id, row);
                    }
                    Ok(None) => {
                        debug!(device_id = %device_id, "Message parent has no children");
                        return;
                    }
                    Err(e) => {
                        metrics::adapters::EVENTS_TOTAL
                            .with_label_values(&["alt", "error"])
                            .inc();
                        warn!(device_id = %device_id, error = %e, "Failed to fetch latest message");
                        return;
                    }
                }
            }
        }
        metrics::adapters::EVENTS_TOTAL
            .with_label_values(&["alt", "relayed"])
            .inc();
    }
}

struct ListenerState {
    active: bool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Start/stop guarded by an explicit `active` flag
pub struct AltSourceListener {
    watcher: SubtreeWatcher,
    state: Mutex<ListenerState>,
}

impl AltSourceListener {
    pub fn new(source: Arc<dyn TreeSource>, signals: Arc<DeviceSignals>, reconnect_delay: Duration) -> Self {
        Self {
            watcher: SubtreeWatcher {
                source,
                signals,
                reconnect_delay,
            },
            state: Mutex::new(ListenerState {
                active: false,
                cancel: CancellationToken::new(),
                tasks: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Listener tasks still running
    #[must_use]
    pub fn running_listeners(&self) -> usize {
        self.state.lock().tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Attach one listener per subtree. Returns false if already active.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.active {
            return false;
        }

        let cancel = CancellationToken::new();
        state.tasks = Subtree::ALL
            .into_iter()
            .map(|subtree| tokio::spawn(self.watcher.clone().run(subtree, cancel.clone())))
            .collect();
        state.cancel = cancel;
        state.active = true;
        info!("Hierarchical database listeners started");
        true
    }

    /// Detach every listener and wait for them to exit. Returns false if not active.
    pub async fn stop(&self) -> bool {
        let tasks = {
            let mut state = self.state.lock();
            if !state.active {
                return false;
            }
            state.active = false;
            state.cancel.cancel();
            std::mem::take(&mut state.tasks)
        };

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Hierarchical database listener task failed");
            }
        }
        info!("Hierarchical database listeners stopped");
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use futures::Stream;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    /// Source whose streams never yield; counts opened and live streams
    #[derive(Default)]
    pub struct PendingSource {
        pub subscribes: AtomicUsize,
        pub live: Arc<AtomicUsize>,
    }

    impl PendingSource {
        pub fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    struct LiveStream {
        live: Arc<AtomicUsize>,
    }

    impl Stream for LiveStream {
        type Item = Result<TreeChange>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    impl Drop for LiveStream {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TreeSource for PendingSource {
        async fn subscribe(&self, _subtree: &str) -> Result<BoxStream<'static, Result<TreeChange>>> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::pin(LiveStream {
                live: self.live.clone(),
            }))
        }

        async fn latest_child(&self, _path: &str) -> Result<Option<(String, JsonValue)>> {
            Ok(None)
        }
    }

    pub async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }
}
