// Module: http
// Dashboard websocket, command endpoints, presence lookups and broker callouts

pub mod broker;
pub mod commands;
pub mod error;
pub mod health;
pub mod middleware;
pub mod presence;
pub mod websocket;

use axum::{
    routing::{get, patch, post},
    Router,
};
use fleetrelay_cluster::ClusterManager;
use fleetrelay_core::service::{CommandService, JwtService};
use fleetrelay_core::PresenceIndex;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use broker::BrokerAuthorizer;
pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cluster: Arc<ClusterManager>,
    pub presence: PresenceIndex,
    pub commands: Arc<CommandService>,
    pub dashboard_tokens: JwtService,
    pub broker: Arc<BrokerAuthorizer>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::create_health_router())
        .route("/ws", get(websocket::websocket_handler))
        .route("/broker/auth", post(broker::authenticate))
        .route("/broker/acl", post(broker::authorize_topic))
        .route("/api/presence", get(presence::get_statuses))
        .route(
            "/api/devices/{device_id}/commands",
            post(commands::create_command).get(commands::list_commands),
        )
        .route("/api/commands/{command_id}", patch(commands::update_command))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::{body::Body, http::Request, response::Response};
    use fleetrelay_core::models::DeviceId;
    use fleetrelay_core::repository::MockCommandStore;
    use fleetrelay_core::service::DashboardRole;
    use fleetrelay_core::sink::RecordingSink;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    pub const DASHBOARD_SECRET: &[u8] = b"dashboard-secret-0123456789abcdefghij";
    pub const DEVICE_SECRET: &[u8] = b"device-secret-0123456789abcdefghijklmn";

    pub struct TestApp {
        pub state: AppState,
        pub sink: Arc<RecordingSink>,
    }

    impl TestApp {
        pub fn new(store: MockCommandStore) -> Self {
            let sink = Arc::new(RecordingSink::new());
            let state = AppState {
                cluster: Arc::new(ClusterManager::standalone().unwrap()),
                presence: PresenceIndex::in_memory(std::time::Duration::from_secs(300)),
                commands: Arc::new(CommandService::new(Arc::new(store), sink.clone())),
                dashboard_tokens: JwtService::hs256(DASHBOARD_SECRET, 0).unwrap(),
                broker: Arc::new(BrokerAuthorizer::new(
                    JwtService::hs256(DEVICE_SECRET, 0).unwrap(),
                    "fleetrelay-bridge",
                    "bridge-secret",
                )),
            };
            Self { state, sink }
        }

        pub fn dashboard_token(&self, role: DashboardRole) -> String {
            self.state
                .dashboard_tokens
                .sign_dashboard_token("operator", role, chrono::Duration::hours(1))
                .unwrap()
        }

        pub fn device_token(&self, device: &str) -> String {
            self.state
                .broker
                .device_tokens()
                .sign_device_token(&DeviceId::from(device), chrono::Duration::hours(1))
                .unwrap()
        }

        pub async fn send(&self, request: Request<Body>) -> Response {
            create_router(self.state.clone()).oneshot(request).await.unwrap()
        }
    }

    pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    pub async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }
}
