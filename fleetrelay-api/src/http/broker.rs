//! Broker authorization callouts (EMQX HTTP authentication and authorization hooks)
//!
//! Devices connect with `username = device id` and `password = device token`.
//! A valid token whose subject matches the username is granted its own
//! `devices/{id}/#` subtree and nothing else. The bridge identity is the only
//! superuser.

use axum::{extract::State, Json};
use fleetrelay_core::service::JwtService;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::http::AppState;

const DEVICE_ROOT: &str = "devices";

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub clientid: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclRule {
    pub permission: Verdict,
    pub action: &'static str,
    pub topic: String,
}

impl AclRule {
    fn new(permission: Verdict, topic: impl Into<String>) -> Self {
        Self {
            permission,
            action: "all",
            topic: topic.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResponse {
    pub result: Verdict,
    pub is_superuser: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub acl: Vec<AclRule>,
}

impl AuthResponse {
    const fn deny() -> Self {
        Self {
            result: Verdict::Deny,
            is_superuser: false,
            acl: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AclRequest {
    #[serde(default)]
    pub username: String,
    pub topic: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclResponse {
    pub result: Verdict,
}

pub struct BrokerAuthorizer {
    device_tokens: JwtService,
    bridge_username: String,
    bridge_secret: String,
}

impl BrokerAuthorizer {
    pub fn new(device_tokens: JwtService, bridge_username: impl Into<String>, bridge_secret: impl Into<String>) -> Self {
        Self {
            device_tokens,
            bridge_username: bridge_username.into(),
            bridge_secret: bridge_secret.into(),
        }
    }

    pub const fn device_tokens(&self) -> &JwtService {
        &self.device_tokens
    }

    fn is_bridge_secret(&self, password: &str) -> bool {
        !self.bridge_secret.is_empty()
            && bool::from(password.as_bytes().ct_eq(self.bridge_secret.as_bytes()))
    }

    pub fn authenticate(&self, request: &AuthRequest) -> AuthResponse {
        if request.username == self.bridge_username {
            if self.is_bridge_secret(&request.password) {
                return AuthResponse {
                    result: Verdict::Allow,
                    is_superuser: true,
                    acl: vec![AclRule::new(Verdict::Allow, "#")],
                };
            }
            warn!(clientid = %request.clientid, "Bridge identity presented a wrong secret");
            return AuthResponse::deny();
        }

        if !is_valid_device_id(&request.username) {
            debug!(clientid = %request.clientid, "Rejecting malformed broker username");
            return AuthResponse::deny();
        }

        let claims = match self.device_tokens.verify_device_token(&request.password) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(username = %request.username, error = %e, "Device token rejected");
                return AuthResponse::deny();
            }
        };

        if claims.sub != request.username {
            warn!(
                username = %request.username,
                subject = %claims.sub,
                "Device token subject does not match connecting identity"
            );
            return AuthResponse::deny();
        }

        AuthResponse {
            result: Verdict::Allow,
            is_superuser: false,
            acl: vec![
                AclRule::new(Verdict::Allow, format!("{DEVICE_ROOT}/{}/#", request.username)),
                AclRule::new(Verdict::Deny, "#"),
            ],
        }
    }

    pub fn authorize_topic(&self, request: &AclRequest) -> AclResponse {
        let allowed = request.username == self.bridge_username
            || (is_valid_device_id(&request.username) && in_own_subtree(&request.username, &request.topic));

        if !allowed {
            debug!(username = %request.username, topic = %request.topic, action = %request.action, "Topic access denied");
        }
        AclResponse {
            result: if allowed { Verdict::Allow } else { Verdict::Deny },
        }
    }
}

fn is_valid_device_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '+', '#'])
}

fn in_own_subtree(device_id: &str, topic: &str) -> bool {
    topic
        .strip_prefix(DEVICE_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_prefix(device_id))
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// `POST /broker/auth`
pub async fn authenticate(State(state): State<AppState>, Json(request): Json<AuthRequest>) -> Json<AuthResponse> {
    Json(state.broker.authenticate(&request))
}

/// `POST /broker/acl`
pub async fn authorize_topic(State(state): State<AppState>, Json(request): Json<AclRequest>) -> Json<AclResponse> {
    Json(state.broker.authorize_topic(&request))
}
