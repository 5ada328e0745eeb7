//! Dashboard websocket
//!
//! `GET /ws?token=...` upgrades after verifying a dashboard token. The
//! connection starts in `global`; clients then send
//! `{"action": "join" | "leave", "room": "device-<id>"}` frames. Every
//! room event is pushed as a JSON text frame `{room, event, payload}`.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use fleetrelay_cluster::{ClusterManager, RoomName};
use fleetrelay_core::metrics::DASHBOARD_CONNECTIONS;
use fleetrelay_core::service::DashboardClaims;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::http::{AppError, AppState};

/// Control replies queued per connection before the reader is paused
const CONTROL_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Dashboard session token
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientFrame {
    Join { room: String },
    Leave { room: String },
}

/// Acknowledgement for a client control frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlReply {
    Joined { room: String },
    Left { room: String },
    Error { reason: String },
}

impl ControlReply {
    fn error(reason: impl Into<String>) -> Self {
        Self::Error { reason: reason.into() }
    }
}

/// Apply one client frame to the connection's room membership
pub fn handle_client_frame(
    cluster: &ClusterManager,
    connection_id: &str,
    claims: &DashboardClaims,
    text: &str,
) -> ControlReply {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return ControlReply::error(format!("Malformed frame: {e}")),
    };

    match frame {
        ClientFrame::Join { room: raw } => {
            let Some(room) = RoomName::parse(&raw) else {
                return ControlReply::error(format!("Unknown room: {raw}"));
            };
            if room.is_privileged() && !claims.is_admin() {
                return ControlReply::error(format!("Room {room} requires the admin role"));
            }
            cluster.join(connection_id, room);
            ControlReply::Joined { room: raw }
        }
        ClientFrame::Leave { room: raw } => {
            let Some(room) = RoomName::parse(&raw) else {
                return ControlReply::error(format!("Unknown room: {raw}"));
            };
            if room.is_global() {
                return ControlReply::error("Cannot leave the global room");
            }
            cluster.leave(connection_id, &room);
            ControlReply::Left { room: raw }
        }
    }
}

/// WebSocket handler for dashboard subscriptions
///
/// Browsers cannot set headers on websocket requests, so the token travels
/// as a query parameter: `ws://host/ws?token={jwt}`
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let token = query
        .token
        .ok_or_else(|| AppError::unauthorized("Missing token query parameter"))?;

    let claims = state
        .dashboard_tokens
        .verify_dashboard_token(&token)
        .map_err(|e| AppError::unauthorized(format!("Invalid token: {e}")))?;

    // control frames are tiny
    Ok(ws
        .max_message_size(16 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state, claims)))
}

async fn handle_socket(socket: WebSocket, state: AppState, claims: DashboardClaims) {
    let cluster = state.cluster.clone();
    let (mut room_rx, connection_id) = cluster.register(&claims.sub);
    DASHBOARD_CONNECTIONS.inc();
    info!(subject = %claims.sub, connection_id = %connection_id, "Dashboard websocket connected");

    let (control_tx, mut control_rx) = mpsc::channel::<ControlReply>(CONTROL_CHANNEL_CAPACITY);
    let (mut ws_sink, mut ws_stream) = socket.split();

    let writer_id = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = room_rx.recv() => match event {
                    Some(event) => event.to_client_frame().to_string(),
                    None => {
                        // the hub dropped this connection, usually for falling behind
                        debug!(connection_id = %writer_id, "Room feed closed, closing websocket");
                        break;
                    }
                },
                Some(reply) = control_rx.recv() => match serde_json::to_string(&reply) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode control reply");
                        continue;
                    }
                },
                else => break,
            };

            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                debug!(connection_id = %writer_id, "Websocket send failed, closing writer");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    loop {
        tokio::select! {
            message = ws_stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_client_frame(&cluster, &connection_id, &claims, text.as_str());
                    if control_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "Websocket receive error");
                    break;
                }
                // binary, ping and pong
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    cluster.unregister(&connection_id);
    drop(control_tx);
    writer.abort();
    DASHBOARD_CONNECTIONS.dec();
    info!(subject = %claims.sub, connection_id = %connection_id, "Dashboard websocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetrelay_cluster::{EventName, RoomEvent};
    use fleetrelay_core::models::DeviceId;
    use fleetrelay_core::service::DashboardRole;
    use serde_json::json;

    fn claims(role: DashboardRole) -> DashboardClaims {
        DashboardClaims {
            sub: "operator".to_string(),
            role,
            iat: 0,
            exp: i64::MAX,
        }
    }

    #[tokio::test]
    async fn test_join_device_room_receives_events() {
        let cluster = ClusterManager::standalone().unwrap();
        let (mut rx, conn) = cluster.register("operator");

        let reply = handle_client_frame(
            &cluster,
            &conn,
            &claims(DashboardRole::Viewer),
            r#"{"action": "join", "room": "device-dev-1"}"#,
        );
        assert_eq!(reply, ControlReply::Joined { room: "device-dev-1".to_string() });

        let room = RoomName::device(&DeviceId::from("dev-1"));
        cluster.broadcast(RoomEvent::new(room, EventName::DeviceChange, json!({"status": true})));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.to_client_frame()["room"], "device-dev-1");

        let reply = handle_client_frame(
            &cluster,
            &conn,
            &claims(DashboardRole::Viewer),
            r#"{"action": "leave", "room": "device-dev-1"}"#,
        );
        assert_eq!(reply, ControlReply::Left { room: "device-dev-1".to_string() });
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_privileged_rooms_need_admin() {
        let cluster = ClusterManager::standalone().unwrap();
        let (_rx, conn) = cluster.register("operator");
        let frame = r#"{"action": "join", "room": "admin-dashboard"}"#;

        let reply = handle_client_frame(&cluster, &conn, &claims(DashboardRole::Viewer), frame);
        assert!(matches!(reply, ControlReply::Error { .. }));
        assert_eq!(cluster.message_hub().subscriber_count(&RoomName::admin_dashboard()), 0);

        let reply = handle_client_frame(&cluster, &conn, &claims(DashboardRole::Admin), frame);
        assert_eq!(reply, ControlReply::Joined { room: "admin-dashboard".to_string() });
        assert_eq!(cluster.message_hub().subscriber_count(&RoomName::admin_dashboard()), 1);
        cluster.shutdown();
    }

    #[tokio::test]
    async fn test_rejected_frames() {
        let cluster = ClusterManager::standalone().unwrap();
        let (_rx, conn) = cluster.register("operator");
        let admin = claims(DashboardRole::Admin);

        for frame in [
            "not json",
            r#"{"action": "shout", "room": "global"}"#,
            r#"{"action": "join", "room": "lobby"}"#,
            r#"{"action": "leave", "room": "global"}"#,
        ] {
            let reply = handle_client_frame(&cluster, &conn, &admin, frame);
            assert!(matches!(reply, ControlReply::Error { .. }), "{frame} should be rejected");
        }
        cluster.shutdown();
    }

    #[test]
    fn test_control_reply_shape() {
        let reply = serde_json::to_value(ControlReply::Joined { room: "global".to_string() }).unwrap();
        assert_eq!(reply, json!({"type": "joined", "room": "global"}));
    }
}
