//! The application-facing API client.
//!
//! Every backend call outside the auth endpoints goes through `ApiClient`.
//! Once a `Session` is attached, requests carry its token and a 401 is
//! renewed and replayed transparently.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use super::transport::{ApiRequest, ApiResponse, HttpTransport};
use super::ApiError;
use crate::auth::interceptor::ResponseInterceptor;
use crate::auth::Session;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Clone is cheap: the transport and the attached session are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<RwLock<Option<Session>>>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Route requests through `session`'s interceptors
    pub fn attach(&self, session: &Session) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
    }

    pub fn detach(&self) -> Option<Session> {
        self.session.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_attached(&self) -> bool {
        self.session.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn current_session(&self) -> Option<Session> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Send a request, backing off on 429s
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = match self.current_session() {
                Some(session) => {
                    ResponseInterceptor::new(&session)
                        .dispatch(self.transport.as_ref(), request.clone())
                        .await?
                }
                None => self.transport.send(request.clone()).await?,
            };

            if response.status.as_u16() != 429 {
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(
                path = %request.path,
                retry = retries,
                backoff_ms = backoff_ms,
                "Rate limited, backing off"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.into_data()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::post(path).json(body)?).await?.into_data()
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::put(path).json(body)?).await?.into_data()
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::delete(path)).await?.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::StatusCode;
    use serde_json::{json, Value};

    use crate::api::testing::{credential, envelope, status, test_session, FakeTransport};

    #[tokio::test]
    async fn test_detached_client_sends_no_token() {
        let transport = FakeTransport::new(|_request| async move { Ok(envelope(json!([]))) });
        let client = ApiClient::new(transport.clone());
        assert!(!client.is_attached());

        let lessons: Vec<Value> = client.get("/lessons").await.unwrap();
        assert!(lessons.is_empty());
        assert_eq!(transport.auth_headers("/lessons"), vec![None]);
    }

    #[tokio::test]
    async fn test_attached_client_sends_session_token() {
        let transport = FakeTransport::new(|request| async move {
            Ok(envelope(request.body.unwrap_or_else(|| json!({}))))
        });
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));
        let client = ApiClient::new(transport.clone());
        client.attach(&session);

        let echoed: Value = client
            .post("/queries", &json!({"sql": "SELECT 1"}))
            .await
            .unwrap();
        assert_eq!(echoed, json!({"sql": "SELECT 1"}));
        assert_eq!(
            transport.auth_headers("/queries"),
            vec![Some("Bearer T1".to_string())]
        );

        assert!(client.detach().is_some());
        let _: Value = client.get("/queries").await.unwrap();
        assert_eq!(transport.auth_headers("/queries").last(), Some(&None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backs_off_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = {
            let calls = Arc::clone(&calls);
            FakeTransport::new(move |_request| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Ok(status(StatusCode::TOO_MANY_REQUESTS))
                    } else {
                        Ok(envelope(json!({"ok": true})))
                    }
                }
            })
        };
        let client = ApiClient::new(transport.clone());

        let started = tokio::time::Instant::now();
        let body: Value = client.get("/progress").await.unwrap();
        assert_eq!(body, json!({"ok": true}));
        assert_eq!(transport.count("/progress"), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gives_up() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(status(StatusCode::TOO_MANY_REQUESTS))
        });
        let client = ApiClient::new(transport.clone());

        let result = client.get::<Value>("/progress").await;
        assert!(matches!(result, Err(ApiError::RateLimited)));
        assert_eq!(transport.count("/progress"), (MAX_RATE_LIMIT_RETRIES + 1) as usize);
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(ApiResponse::new(
                StatusCode::NOT_FOUND,
                r#"{"success":false,"message":"Lesson not found"}"#,
            ))
        });
        let client = ApiClient::new(transport);
        match client.get::<Value>("/lessons/99").await {
            Err(ApiError::NotFound(message)) => assert_eq!(message, "Lesson not found"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
