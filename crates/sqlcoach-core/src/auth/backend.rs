//! Raw calls to the authentication endpoints.
//!
//! These bypass the interceptors: they carry an explicit token (or none) and
//! a 401 here is an answer, not a reason to renew.

use std::sync::Arc;

use tracing::debug;

use crate::api::transport::{ApiRequest, HttpTransport};
use crate::api::ApiError;
use crate::models::{AuthPayload, Credential, LoginRequest, RefreshPayload, RegisterRequest};

pub const LOGIN_PATH: &str = "/login";
pub const REGISTER_PATH: &str = "/register";
pub const LOGOUT_PATH: &str = "/logout";
pub const REFRESH_PATH: &str = "/refresh";
pub const CHECK_TOKEN_PATH: &str = "/check-token";

#[derive(Clone)]
pub struct AuthBackend {
    transport: Arc<dyn HttpTransport>,
}

impl AuthBackend {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
        let payload: AuthPayload = self.transport.send(request).await?.into_data()?;
        debug!(user_id = payload.user.id, "Login accepted");
        Ok(payload.into())
    }

    pub async fn register(&self, form: &RegisterRequest<'_>) -> Result<Credential, ApiError> {
        let request = ApiRequest::post(REGISTER_PATH).json(form)?;
        let payload: AuthPayload = self.transport.send(request).await?.into_data()?;
        debug!(user_id = payload.user.id, "Registration accepted");
        Ok(payload.into())
    }

    pub async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(LOGOUT_PATH).bearer(token);
        self.transport.send(request).await?.error_for_status()?;
        Ok(())
    }

    /// Exchange `token` for a fresh one
    pub async fn refresh(&self, token: &str) -> Result<RefreshPayload, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).bearer(token);
        self.transport.send(request).await?.into_data()
    }
}
