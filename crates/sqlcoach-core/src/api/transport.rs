//! The HTTP seam between the session core and the network.
//!
//! Everything above this module speaks `ApiRequest`/`ApiResponse`; only
//! `ReqwestTransport` knows about `reqwest`. Tests plug in a scripted
//! transport instead.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::ApiError;
use crate::config::Config;
use crate::models::ApiEnvelope;

/// A request relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Set once the request has been replayed after a token renewal
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Attach `Authorization: Bearer <token>`, replacing any previous value
    pub fn set_bearer(&mut self, token: &str) {
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => {
                self.headers.insert(header::AUTHORIZATION, value);
            }
            Err(_) => {
                debug!(path = %self.path, "Token is not a valid header value, sending without it");
                self.headers.remove(header::AUTHORIZATION);
            }
        }
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.set_bearer(token);
        self
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Return the response unchanged if successful, otherwise the mapped error
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Check the status, then unwrap the `{success, data, message}` envelope
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let response = self.error_for_status()?;
        response.json::<ApiEnvelope<T>>()?.into_data()
    }
}

/// Sends one request and returns whatever the server answered.
///
/// Implementations must not interpret status codes: a 401 is a normal
/// `Ok(ApiResponse)` so the interceptors above can react to it.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>>;
}

/// Production transport backed by a pooled `reqwest::Client`.
/// Clone is cheap - reqwest::Client uses Arc internally.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(config.api_base_url(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        async move {
            let url = self.url(&request.path);
            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .header(header::ACCEPT, "application/json")
                .headers(request.headers);
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let body = response.text().await?;
            debug!(method = %request.method, url = %url, status = status.as_u16(), "Response received");

            Ok(ApiResponse { status, body })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_replaces_previous_header() {
        let mut request = ApiRequest::get("/questions").bearer("old");
        request.set_bearer("new");
        assert_eq!(request.authorization(), Some("Bearer new"));
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn test_invalid_token_is_dropped() {
        let request = ApiRequest::get("/questions").bearer("bad\ntoken");
        assert_eq!(request.authorization(), None);
    }

    #[test]
    fn test_url_joining() {
        let transport =
            ReqwestTransport::new("http://localhost:8000/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "http://localhost:8000/api");
        assert_eq!(transport.url("/login"), "http://localhost:8000/api/login");
        assert_eq!(transport.url("login"), "http://localhost:8000/api/login");
    }

    #[test]
    fn test_into_data_maps_error_status() {
        let response = ApiResponse::new(StatusCode::NOT_FOUND, r#"{"message":"No such lesson"}"#);
        match response.into_data::<serde_json::Value>() {
            Err(ApiError::NotFound(msg)) => assert_eq!(msg, "No such lesson"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
