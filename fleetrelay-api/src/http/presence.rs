//! Bulk presence lookup for dashboard device lists

use axum::{
    extract::{Query, State},
    Json,
};
use fleetrelay_core::models::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::http::{middleware::DashboardUser, AppError, AppResult, AppState};

const MAX_IDS_PER_LOOKUP: usize = 500;

#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    /// Comma-separated device ids
    #[serde(default)]
    pub ids: String,
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub statuses: BTreeMap<String, bool>,
}

fn parse_ids(raw: &str) -> AppResult<Vec<DeviceId>> {
    let mut ids: Vec<DeviceId> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(DeviceId::from)
        .collect();
    ids.sort();
    ids.dedup();

    if ids.len() > MAX_IDS_PER_LOOKUP {
        return Err(AppError::bad_request(format!(
            "At most {MAX_IDS_PER_LOOKUP} device ids per lookup"
        )));
    }
    Ok(ids)
}

/// `GET /api/presence?ids=a,b,c`
///
/// Unknown ids and backend failures both report `false`.
pub async fn get_statuses(
    _user: DashboardUser,
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> AppResult<Json<PresenceResponse>> {
    let ids = parse_ids(&query.ids)?;
    let statuses = state
        .presence
        .get_statuses(&ids)
        .await
        .into_iter()
        .map(|(id, online)| (id.as_str().to_string(), online))
        .collect();
    Ok(Json(PresenceResponse { statuses }))
}
