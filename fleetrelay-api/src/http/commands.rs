//! Command endpoints
//!
//! Dashboards queue commands; devices acknowledge them by walking the status
//! machine. Every accepted change is relayed to `commands-{device}` and `command-feed`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use fleetrelay_core::models::{
    Command, CommandId, CommandStatus, CreateCommandRequest, DeviceId, UpdateCommandStatusRequest,
};
use serde::Deserialize;
use tracing::info;

use crate::http::{
    middleware::{Caller, DashboardUser},
    AppError, AppResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListCommandsQuery {
    pub status: Option<String>,
}

/// `POST /api/devices/{device_id}/commands`
pub async fn create_command(
    user: DashboardUser,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<CreateCommandRequest>,
) -> AppResult<(StatusCode, Json<Command>)> {
    user.require_admin()?;

    let command = state.commands.create(DeviceId::from(device_id), request).await?;
    info!(operator = %user.0.sub, command_id = %command.id, "Command queued from dashboard");
    Ok((StatusCode::CREATED, Json(command)))
}

/// `GET /api/devices/{device_id}/commands?status=pending`
pub async fn list_commands(
    caller: Caller,
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<ListCommandsQuery>,
) -> AppResult<Json<Vec<Command>>> {
    let device_id = DeviceId::from(device_id);
    caller.authorize_device(&device_id, false)?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<CommandStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;

    Ok(Json(state.commands.list_for_device(&device_id, status).await?))
}

/// `PATCH /api/commands/{command_id}`
pub async fn update_command(
    caller: Caller,
    State(state): State<AppState>,
    Path(command_id): Path<String>,
    Json(request): Json<UpdateCommandStatusRequest>,
) -> AppResult<Json<Command>> {
    let command_id = CommandId::from(command_id);
    let current = state.commands.get(&command_id).await?;
    caller.authorize_device(&current.device_id, true)?;

    let updated = state
        .commands
        .transition(&command_id, request.status, request.error)
        .await?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::*;
    use fleetrelay_core::models::{ChangeType, EventKind};
    use fleetrelay_core::repository::MockCommandStore;
    use fleetrelay_core::service::DashboardRole;
    use serde_json::json;

    fn stored(device: &str, status: CommandStatus) -> Command {
        let mut command = Command::new(DeviceId::from(device), "reboot".to_string(), json!({}));
        command.status = status;
        command
    }

    #[tokio::test]
    async fn test_admin_creates_command() {
        let mut store = MockCommandStore::new();
        store.expect_create().returning(|c| Ok(c.clone()));
        let app = TestApp::new(store);
        let token = app.dashboard_token(DashboardRole::Admin);

        let response = app
            .send(json_request(
                "POST",
                "/api/devices/dev-1/commands",
                Some(&token),
                json!({"command_type": "reboot", "payload": {"delay": 5}}),
            ))
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["device_id"], "dev-1");
        assert_eq!(body["status"], "pending");

        let events = app.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::CommandChange);
        assert_eq!(events[0].change, ChangeType::Insert);
    }

    #[tokio::test]
    async fn test_viewer_and_device_cannot_create() {
        let mut store = MockCommandStore::new();
        store.expect_create().never();
        let app = TestApp::new(store);
        let body = json!({"command_type": "reboot"});

        let viewer = app.dashboard_token(DashboardRole::Viewer);
        let response = app
            .send(json_request("POST", "/api/devices/dev-1/commands", Some(&viewer), body.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let device = app.device_token("dev-1");
        let response = app
            .send(json_request("POST", "/api/devices/dev-1/commands", Some(&device), body))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_device_lists_only_its_own_commands() {
        let mut store = MockCommandStore::new();
        store
            .expect_list_for_device()
            .withf(|id, status| id.as_str() == "dev-1" && *status == Some(CommandStatus::Pending))
            .returning(|_, _| Ok(vec![stored("dev-1", CommandStatus::Pending)]));
        let app = TestApp::new(store);
        let token = app.device_token("dev-1");

        let response = app
            .send(get_request("/api/devices/dev-1/commands?status=pending", Some(&token)))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let response = app
            .send(get_request("/api/devices/dev-2/commands", Some(&token)))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_status_filter_rejected() {
        let app = TestApp::new(MockCommandStore::new());
        let token = app.dashboard_token(DashboardRole::Viewer);
        let response = app
            .send(get_request("/api/devices/dev-1/commands?status=sleeping", Some(&token)))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_acknowledges_command() {
        let command = stored("dev-1", CommandStatus::Pending);
        let id = command.id.as_str().to_string();
        let mut store = MockCommandStore::new();
        let current = command.clone();
        store.expect_get().returning(move |_| Ok(Some(current.clone())));
        store.expect_update_status().returning(move |_, _, to, _, at| {
            let mut updated = command.clone();
            updated.status = to;
            updated.delivered_at = Some(at);
            Ok(Some(updated))
        });
        let app = TestApp::new(store);
        let token = app.device_token("dev-1");

        let response = app
            .send(json_request(
                "PATCH",
                &format!("/api/commands/{id}"),
                Some(&token),
                json!({"status": "delivered"}),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "delivered");

        let events = app.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change, ChangeType::Update);
    }

    #[tokio::test]
    async fn test_other_device_cannot_touch_command() {
        let command = stored("dev-1", CommandStatus::Pending);
        let id = command.id.as_str().to_string();
        let mut store = MockCommandStore::new();
        store.expect_get().returning(move |_| Ok(Some(command.clone())));
        store.expect_update_status().never();
        let app = TestApp::new(store);
        let token = app.device_token("dev-2");

        let response = app
            .send(json_request(
                "PATCH",
                &format!("/api/commands/{id}"),
                Some(&token),
                json!({"status": "executed"}),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(app.sink.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_command_conflict() {
        let command = stored("dev-1", CommandStatus::Executed);
        let id = command.id.as_str().to_string();
        let mut store = MockCommandStore::new();
        store.expect_get().returning(move |_| Ok(Some(command.clone())));
        let app = TestApp::new(store);
        let token = app.dashboard_token(DashboardRole::Admin);

        let response = app
            .send(json_request(
                "PATCH",
                &format!("/api/commands/{id}"),
                Some(&token),
                json!({"status": "cancelled"}),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_command_not_found() {
        let mut store = MockCommandStore::new();
        store.expect_get().returning(|_| Ok(None));
        let app = TestApp::new(store);
        let token = app.dashboard_token(DashboardRole::Admin);

        let response = app
            .send(json_request("PATCH", "/api/commands/missing", Some(&token), json!({"status": "cancelled"})))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
