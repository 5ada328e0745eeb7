use futures::stream::StreamExt;
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dedup::MessageDeduplicator;
use super::events::RoomEvent;
use super::room_hub::RoomMessageHub;
use crate::rooms::RoomName;
use crate::{Error, Result};

/// Timeout for Redis operations in seconds
const REDIS_TIMEOUT_SECS: u64 = 5;

/// Initial backoff delay for reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for reconnection
const MAX_BACKOFF_SECS: u64 = 30;

const ROOM_CHANNEL_PREFIX: &str = "fleetrelay:room:";
const ROOM_CHANNEL_PATTERN: &str = "fleetrelay:room:*";

/// Redis Pub/Sub transport for cross-node room delivery
///
/// 1. Local room events are published to `fleetrelay:room:{room}`
/// 2. `fleetrelay:room:*` is pattern-subscribed for events from other nodes
/// 3. Received events are forwarded to the local `RoomMessageHub`
pub struct RedisPubSub {
    redis_client: RedisClient,
    message_hub: Arc<RoomMessageHub>,
    node_id: String,
    deduplicator: Arc<MessageDeduplicator>,
    cancel_token: CancellationToken,
}

impl RedisPubSub {
    pub fn new(
        redis_url: &str,
        message_hub: Arc<RoomMessageHub>,
        node_id: String,
        deduplicator: Arc<MessageDeduplicator>,
    ) -> Result<Self> {
        let redis_client = RedisClient::open(redis_url)
            .map_err(|e| Error::Configuration(format!("Invalid Redis URL: {e}")))?;

        Ok(Self {
            redis_client,
            message_hub,
            node_id,
            deduplicator,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Cancel the subscriber and publisher tasks
    pub fn shutdown(&self) {
        info!("Shutting down RedisPubSub service");
        self.cancel_token.cancel();
    }

    /// Capacity for the publish channel. Events are dropped with a warning when full
    /// (e.g., during a prolonged Redis outage).
    pub const PUBLISH_CHANNEL_CAPACITY: usize = 10_000;

    /// Spawn the publisher and subscriber tasks
    #[must_use]
    pub fn start(self: Arc<Self>) -> mpsc::Sender<RoomEvent> {
        let (publish_tx, publish_rx) = mpsc::channel::<RoomEvent>(Self::PUBLISH_CHANNEL_CAPACITY);

        tokio::spawn(Self::run_publisher(
            self.redis_client.clone(),
            self.node_id.clone(),
            publish_rx,
            self.cancel_token.clone(),
        ));

        let cancel_subscriber = self.cancel_token.clone();
        tokio::spawn(async move {
            let mut backoff_secs = INITIAL_BACKOFF_SECS;

            loop {
                if cancel_subscriber.is_cancelled() {
                    info!("Redis subscriber task cancelled");
                    return;
                }

                let exit = tokio::select! {
                    () = cancel_subscriber.cancelled() => {
                        info!("Redis subscriber task cancelled");
                        return;
                    }
                    exit = self.run_subscriber() => exit,
                };

                match exit {
                    SubscriberExit::Disconnected => {
                        // the server was reachable, start over from the shortest delay
                        error!(
                            "Redis subscriber stream ended (connection lost), reconnecting after {}s",
                            INITIAL_BACKOFF_SECS
                        );
                        backoff_secs = INITIAL_BACKOFF_SECS;
                    }
                    SubscriberExit::ConnectFailed(e) => {
                        error!(
                            error = %e,
                            backoff_secs = backoff_secs,
                            "Redis subscriber failed to connect, retrying after backoff"
                        );
                    }
                }

                tokio::select! {
                    () = cancel_subscriber.cancelled() => {
                        info!("Redis subscriber task cancelled during backoff");
                        return;
                    }
                    () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }

                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        });

        publish_tx
    }

    async fn run_publisher(
        client: RedisClient,
        node_id: String,
        mut publish_rx: mpsc::Receiver<RoomEvent>,
        cancel: CancellationToken,
    ) {
        let mut backoff_secs = INITIAL_BACKOFF_SECS;
        // a failed publish is retried once the connection is back
        let mut retry_event: Option<RoomEvent> = None;

        loop {
            let connect = tokio::select! {
                () = cancel.cancelled() => {
                    info!("Redis publisher task cancelled");
                    return;
                }
                connect = timeout(
                    Duration::from_secs(REDIS_TIMEOUT_SECS),
                    client.get_multiplexed_async_connection(),
                ) => connect,
            };

            let mut conn = match connect {
                Ok(Ok(conn)) => {
                    backoff_secs = INITIAL_BACKOFF_SECS;
                    conn
                }
                Ok(Err(e)) => {
                    error!(error = %e, backoff_secs, "Failed to get Redis connection for publishing, retrying");
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
                Err(_) => {
                    error!(backoff_secs, "Timed out getting Redis connection for publishing, retrying");
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
            };

            info!("Redis publisher task (re)connected");

            loop {
                let event = if let Some(event) = retry_event.take() {
                    event
                } else {
                    let next = tokio::select! {
                        () = cancel.cancelled() => {
                            info!("Redis publisher task cancelled");
                            return;
                        }
                        next = publish_rx.recv() => next,
                    };
                    let Some(event) = next else {
                        warn!("Redis publisher channel closed, exiting");
                        return;
                    };
                    event
                };

                match Self::publish_event(&mut conn, &node_id, &event).await {
                    Ok(receivers) => {
                        debug!(room = %event.room, event = %event.name, receivers, "Event published to Redis");
                    }
                    Err(Error::Serialization(e)) => {
                        error!(error = %e, room = %event.room, "Dropping unserializable event");
                    }
                    Err(e) => {
                        error!(error = %e, room = %event.room, "Failed to publish event, saving for retry after reconnect");
                        retry_event = Some(event);
                        break;
                    }
                }
            }

            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }
    }

    /// Returns `Disconnected` if the subscription was live and then dropped,
    /// `ConnectFailed` if connecting or subscribing failed.
    async fn run_subscriber(&self) -> SubscriberExit {
        let mut pubsub = match timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            self.redis_client.get_async_pubsub(),
        )
        .await
        {
            Ok(Ok(ps)) => ps,
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(Error::Redis(e)),
            Err(_) => {
                return SubscriberExit::ConnectFailed(Error::Timeout(
                    "Timed out getting Redis Pub/Sub connection".to_string(),
                ));
            }
        };

        match timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            pubsub.psubscribe(ROOM_CHANNEL_PATTERN),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return SubscriberExit::ConnectFailed(Error::Redis(e)),
            Err(_) => {
                return SubscriberExit::ConnectFailed(Error::Timeout(format!(
                    "Timed out subscribing to {ROOM_CHANNEL_PATTERN}"
                )));
            }
        }

        info!(node_id = %self.node_id, "Redis subscriber connected, listening to {}", ROOM_CHANNEL_PATTERN);

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, channel = %channel, "Invalid payload");
                    continue;
                }
            };

            match serde_json::from_str::<ClusterEnvelope>(&payload) {
                Ok(envelope) => {
                    // already delivered locally by the publishing node
                    if envelope.node_id == self.node_id {
                        continue;
                    }
                    self.dispatch_event(&channel, envelope.event);
                }
                Err(e) => {
                    warn!(error = %e, channel = %channel, "Failed to deserialize cluster envelope");
                }
            }
        }

        SubscriberExit::Disconnected
    }

    /// Deliver an event from another node to local room members
    fn dispatch_event(&self, channel: &str, event: RoomEvent) {
        if !self.deduplicator.should_process(&event.event_id) {
            debug!(channel = %channel, event_id = %event.event_id, "Skipping duplicate event from Redis");
            return;
        }

        let Some(room) = channel.strip_prefix(ROOM_CHANNEL_PREFIX).and_then(RoomName::parse) else {
            warn!(channel = %channel, "Invalid channel format");
            return;
        };
        if room != event.room {
            warn!(channel = %channel, room = %event.room, "Channel and event room disagree, dropping");
            return;
        }

        let sent_count = self.message_hub.broadcast(&event);
        debug!(room = %room, local_subscribers = sent_count, "Forwarded Redis event to local subscribers");
    }

    async fn publish_event(
        conn: &mut redis::aio::MultiplexedConnection,
        node_id: &str,
        event: &RoomEvent,
    ) -> Result<usize> {
        let channel = channel_for(&event.room);
        let payload = serde_json::to_string(&ClusterEnvelope {
            node_id: node_id.to_string(),
            event: event.clone(),
        })?;

        let receivers: usize = timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            conn.publish(&channel, &payload),
        )
        .await
        .map_err(|_| Error::Timeout("Timed out publishing to Redis".to_string()))??;

        Ok(receivers)
    }
}

fn channel_for(room: &RoomName) -> String {
    format!("{ROOM_CHANNEL_PREFIX}{room}")
}

/// How the subscriber loop exited, so backoff can be reset or grown
enum SubscriberExit {
    Disconnected,
    ConnectFailed(Error),
}

/// Wire form on Redis: `{node_id, event_id, room, event, payload, timestamp}`.
/// Carries `node_id` so each node ignores its own echoes.
#[derive(Debug, Serialize, Deserialize)]
struct ClusterEnvelope {
    node_id: String,
    #[serde(flatten)]
    event: RoomEvent,
}
