//! Firebase-style realtime database over the REST streaming API

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use super::sse::{SseDecoder, SseEvent};
use super::{TreeChange, TreeSource};
use crate::{IngestError, Result};

/// Upstream sends a keep-alive every ~30s; three missed ones mean a dead connection
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
struct StreamData {
    path: String,
    #[serde(default)]
    data: JsonValue,
}

pub struct FirebaseSource {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl FirebaseSource {
    /// The client has no overall timeout so streams can stay open; plain reads use `request_timeout`.
    pub fn new(base_url: &str, auth_token: Option<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            request_timeout,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// Drop a stream that has sent nothing, keep-alives included, for `idle_timeout`
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }
}

/// Map one SSE event onto the tree change it describes
fn to_change(event: &SseEvent) -> Option<Result<TreeChange>> {
    match event.event.as_str() {
        "put" | "patch" => Some(
            serde_json::from_str::<StreamData>(&event.data)
                .map(|d| TreeChange {
                    path: d.path,
                    data: d.data,
                    patch: event.event == "patch",
                })
                .map_err(IngestError::from),
        ),
        "cancel" | "auth_revoked" => Some(Err(IngestError::StreamClosed(event.event.clone()))),
        _ => None,
    }
}

/// Decode an SSE body into tree changes. A silent body yields `StreamIdle`
/// so the watcher reconnects instead of waiting on a half-open socket.
fn decode_changes<S, B, E>(body: S, idle_timeout: Duration) -> BoxStream<'static, Result<TreeChange>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<IngestError> + Send + 'static,
{
    let state = (Box::pin(body), SseDecoder::new(), VecDeque::<Result<TreeChange>>::new());

    stream::unfold(state, move |(mut body, mut decoder, mut pending)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (body, decoder, pending)));
            }
            match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => {
                    pending.extend(decoder.feed(chunk.as_ref()).iter().filter_map(to_change));
                }
                Ok(Some(Err(e))) => return Some((Err(e.into()), (body, decoder, pending))),
                Ok(None) => return None,
                Err(_) => {
                    let idle = IngestError::StreamIdle(format!("no data for {idle_timeout:?}"));
                    return Some((Err(idle), (body, decoder, pending)));
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl TreeSource for FirebaseSource {
    async fn subscribe(&self, subtree: &str) -> Result<BoxStream<'static, Result<TreeChange>>> {
        let response = self
            .authed(self.client.get(self.url(subtree)))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        debug!(subtree, "Opened hierarchical database stream");

        Ok(decode_changes(response.bytes_stream(), self.idle_timeout))
    }

    async fn latest_child(&self, path: &str) -> Result<Option<(String, JsonValue)>> {
        let value: JsonValue = self
            .authed(self.client.get(self.url(path)))
            .query(&[("orderBy", "\"$key\""), ("limitToLast", "1")])
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(match value {
            JsonValue::Object(map) => map.into_iter().max_by(|a, b| a.0.cmp(&b.0)),
            _ => None,
        })
    }
}
