use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Credential, User};
use crate::api::ApiError;

/// Every backend response is wrapped in `{success, data, message}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, turning `success: false` into an error carrying the message
    pub fn into_data(self) -> Result<T, ApiError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(ApiError::InvalidResponse(
                "Response envelope is missing data".to_string(),
            )),
            (false, _) => Err(ApiError::Rejected(
                self.message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub password_confirmation: &'a str,
}

/// Returned by `/login` and `/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<AuthPayload> for Credential {
    fn from(payload: AuthPayload) -> Self {
        Credential::new(payload.token, payload.expires_at, payload.user)
    }
}

/// Returned by `/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshPayload {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Returned by `/check-token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenCheck {
    #[serde(default)]
    pub refreshed: bool,
    #[serde(default)]
    pub token: Option<String>,
    pub expires_at: DateTime<Utc>,
}
