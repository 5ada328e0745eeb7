use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use crate::{models::DeviceId, Error, Result};

/// Claims carried by a device's broker credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceClaims {
    /// Device ID the credential was issued to
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl DeviceClaims {
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        DeviceId::from_string(self.sub.clone())
    }
}

/// Dashboard operator role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardRole {
    Admin,
    Viewer,
}

/// Claims carried by a dashboard session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardClaims {
    pub sub: String,
    pub role: DashboardRole,
    pub iat: i64,
    pub exp: i64,
}

impl DashboardClaims {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == DashboardRole::Admin
    }
}

/// HS256 token signer/verifier
#[derive(Clone)]
pub struct JwtService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    algorithm: Algorithm,
    leeway_seconds: u64,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("algorithm", &self.algorithm)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish()
    }
}

impl JwtService {
    /// Create a new JWT service with a shared HMAC secret
    pub fn hs256(secret: &[u8], leeway_seconds: u64) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::InvalidInput("JWT secret must not be empty".to_string()));
        }
        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            algorithm: Algorithm::HS256,
            leeway_seconds,
        })
    }

    pub fn sign_device_token(&self, device_id: &DeviceId, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        self.sign(&DeviceClaims {
            sub: device_id.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        })
    }

    /// Verify signature and expiry of a device credential
    pub fn verify_device_token(&self, token: &str) -> Result<DeviceClaims> {
        self.verify(token)
    }

    pub fn sign_dashboard_token(&self, subject: &str, role: DashboardRole, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        self.sign(&DashboardClaims {
            sub: subject.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        })
    }

    pub fn verify_dashboard_token(&self, token: &str) -> Result<DashboardClaims> {
        self.verify(token)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let header = Header::new(self.algorithm);
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = self.leeway_seconds;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::Authentication("Token expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    Error::Authentication("Invalid token signature".to_string())
                }
                _ => Error::Authentication(format!("Token verification failed: {e}")),
            })
    }
}
