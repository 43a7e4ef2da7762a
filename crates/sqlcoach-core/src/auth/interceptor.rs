//! Request/response interception for authenticated calls.
//!
//! `RequestInterceptor` stamps the current token on every outbound request.
//! `ResponseInterceptor` turns a first 401 into a single-flight renewal and a
//! replay, so callers never see an expiring token.

use reqwest::StatusCode;
use tracing::{debug, warn};

use super::session::{Session, SESSION_EXPIRED_MESSAGE};
use super::TokenStore;
use crate::api::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::api::ApiError;

pub struct RequestInterceptor<'a> {
    store: &'a TokenStore,
}

impl<'a> RequestInterceptor<'a> {
    pub fn new(store: &'a TokenStore) -> Self {
        Self { store }
    }

    /// Attach the stored token, or leave the request unauthenticated.
    /// Returns the token that was attached.
    pub fn apply(&self, request: &mut ApiRequest) -> Option<String> {
        let token = self.store.token()?;
        request.set_bearer(&token);
        Some(token)
    }
}

pub struct ResponseInterceptor<'a> {
    session: &'a Session,
}

impl<'a> ResponseInterceptor<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Send `request`, renewing the token and replaying once on a 401.
    ///
    /// - non-401 responses and transport errors come back unchanged
    /// - a 401 with no stored token fails immediately
    /// - a 401 on the replay ends the session instead of renewing again
    pub async fn dispatch(
        &self,
        transport: &dyn HttpTransport,
        request: ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        let (response, _) = self.dispatch_tracked(transport, request).await?;
        Ok(response)
    }

    /// Like `dispatch`, also returning the token the answered request carried
    pub async fn dispatch_tracked(
        &self,
        transport: &dyn HttpTransport,
        mut request: ApiRequest,
    ) -> Result<(ApiResponse, Option<String>), ApiError> {
        let mut replay_token: Option<String> = None;

        loop {
            let mut outbound = request.clone();
            let sent = match replay_token.take() {
                Some(token) => {
                    outbound.set_bearer(&token);
                    Some(token)
                }
                None => RequestInterceptor::new(self.session.token_store()).apply(&mut outbound),
            };

            let response = transport.send(outbound).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return Ok((response, sent));
            }

            if request.retried {
                warn!(path = %request.path, "Rejected again after token renewal, ending session");
                self.session.expire(SESSION_EXPIRED_MESSAGE);
                return Err(ApiError::Unauthorized);
            }

            if self.session.token_store().token().is_none() {
                debug!(path = %request.path, "401 without a stored token, not renewing");
                return Err(ApiError::Unauthorized);
            }

            request.retried = true;
            debug!(path = %request.path, "401 received, renewing token");
            let token = self.session.renew().await?;
            replay_token = Some(token);
        }
    }
}
