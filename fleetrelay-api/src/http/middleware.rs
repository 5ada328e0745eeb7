//! Request authentication extractors

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use fleetrelay_core::models::DeviceId;
use fleetrelay_core::service::DashboardClaims;

use crate::http::{AppError, AppState};

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|e| AppError::unauthorized(format!("Invalid Authorization header: {e}")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("Expected a Bearer token"))
}

/// Dashboard operator authenticated by a dashboard session token
#[derive(Debug, Clone)]
pub struct DashboardUser(pub DashboardClaims);

impl DashboardUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.0.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Admin role required"))
        }
    }
}

impl<S> FromRequestParts<S> for DashboardUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts)?;
        let claims = app_state.dashboard_tokens.verify_dashboard_token(token)?;
        Ok(Self(claims))
    }
}

/// Either a dashboard operator or a device presenting its own broker credential
#[derive(Debug, Clone)]
pub enum Caller {
    Dashboard(DashboardClaims),
    Device(DeviceId),
}

impl Caller {
    /// Devices may only touch their own resources; dashboards need `admin` to write
    pub fn authorize_device(&self, device_id: &DeviceId, write: bool) -> Result<(), AppError> {
        match self {
            Self::Device(own) if own == device_id => Ok(()),
            Self::Device(_) => Err(AppError::forbidden("Device may only access its own commands")),
            Self::Dashboard(claims) if write && !claims.is_admin() => {
                Err(AppError::forbidden("Admin role required"))
            }
            Self::Dashboard(_) => Ok(()),
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts)?;

        if let Ok(claims) = app_state.dashboard_tokens.verify_dashboard_token(token) {
            return Ok(Self::Dashboard(claims));
        }
        let claims = app_state.broker.device_tokens().verify_device_token(token)?;
        Ok(Self::Device(claims.device_id()))
    }
}
