//! Scripted transport and fixtures shared by the unit tests.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde_json::json;

use super::transport::{ApiRequest, ApiResponse, HttpTransport};
use super::ApiError;
use crate::auth::storage::{KeyValueStore, MemoryStore};
use crate::auth::Session;
use crate::config::Config;
use crate::models::{Credential, User};

type Handler =
    dyn Fn(ApiRequest) -> BoxFuture<'static, Result<ApiResponse, ApiError>> + Send + Sync;

/// Answers every request through `handler` and records what was sent.
pub struct FakeTransport {
    handler: Box<Handler>,
    log: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new<F, Fut>(handler: F) -> Arc<Self>
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse, ApiError>> + Send + 'static,
    {
        Arc::new(Self {
            handler: Box::new(move |request| handler(request).boxed()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    /// `Authorization` header of every request sent to `path`, in order
    pub fn auth_headers(&self, path: &str) -> Vec<Option<String>> {
        self.requests()
            .iter()
            .filter(|r| r.path == path)
            .map(|r| r.authorization().map(str::to_string))
            .collect()
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        self.log.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}

pub fn envelope(data: serde_json::Value) -> ApiResponse {
    ApiResponse::new(
        StatusCode::OK,
        json!({"success": true, "data": data, "message": null}).to_string(),
    )
}

pub fn status(code: StatusCode) -> ApiResponse {
    ApiResponse::new(code, json!({"success": false, "message": "error"}).to_string())
}

pub fn user() -> User {
    User {
        id: 1,
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
    }
}

pub fn credential(token: &str, minutes: i64) -> Credential {
    Credential::new(token, Utc::now() + Duration::minutes(minutes), user())
}

pub fn auth_payload(token: &str, expires_at: &str) -> serde_json::Value {
    json!({
        "user": {"id": 1, "name": "Ada Lovelace", "email": "ada@example.com"},
        "token": token,
        "expires_at": expires_at,
    })
}

pub fn test_config() -> Config {
    Config {
        session_check_interval_secs: 60,
        ..Config::default()
    }
}

pub fn test_session(transport: Arc<FakeTransport>) -> Session {
    let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    Session::new(&test_config(), transport, storage)
}

/// Yield to other tasks until `condition` holds
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
