//! Periodic `/check-token` loop.
//!
//! While someone is logged in, the monitor asks the backend about the token
//! every `session_check_interval`. The task holds only a weak reference to
//! the session, so dropping the last `Session` ends it too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::session::{Session, SessionInner, TokenStatus};
use crate::api::ApiError;

pub struct SessionMonitor {
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every start/stop; a loop exits once its generation is stale
    generation: Arc<AtomicU64>,
}

impl SessionMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start checking, replacing any loop already running.
    ///
    /// The previous loop is not aborted: a check it has in flight (possibly
    /// driving a renewal other requests are queued on) runs to completion,
    /// then the loop exits at its next tick.
    pub(crate) fn start(&self, session: Weak<SessionInner>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = tokio::spawn(run(
            session,
            self.period,
            Arc::clone(&self.generation),
            generation,
        ));
        self.lock().replace(handle);
        debug!(period_secs = self.period.as_secs(), generation, "Session monitor started");
    }

    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.lock().take() {
            handle.abort();
            debug!("Session monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    session: Weak<SessionInner>,
    period: Duration,
    current: Arc<AtomicU64>,
    generation: u64,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if current.load(Ordering::SeqCst) != generation {
            debug!(generation, "Session monitor replaced, exiting");
            break;
        }
        let Some(session) = Session::upgrade(&session) else {
            break;
        };
        if !session.is_authenticated() {
            debug!("No credential, session monitor exiting");
            break;
        }

        match session.check_token().await {
            Ok(TokenStatus::Refreshed) => {
                // Count the next period from the new token
                ticker.reset();
            }
            Ok(TokenStatus::Valid) => debug!("Token still valid"),
            Err(ApiError::SessionExpired(e)) => {
                info!(error = %e, "Session could not be renewed");
                break;
            }
            Err(ApiError::NotAuthenticated) | Err(ApiError::Unauthorized) => {
                if !session.is_authenticated() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Token check failed, will retry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use reqwest::StatusCode;
    use serde_json::{json, Value};

    use tokio::sync::Semaphore;

    use crate::api::testing::{
        credential, envelope, status, test_session, wait_until, FakeTransport,
    };
    use crate::api::ApiClient;
    use crate::auth::session::SESSION_EXPIRED_MESSAGE;

    const PERIOD: std::time::Duration = std::time::Duration::from_secs(60);
    const E2: &str = "2031-01-01T00:00:00Z";

    async fn advance_periods(n: u32) {
        for _ in 0..n {
            tokio::time::advance(PERIOD).await;
            for _ in 0..100 {
                tokio::task::yield_now().await;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_adopts_refreshed_token() {
        let checks = Arc::new(AtomicUsize::new(0));
        let transport = {
            let checks = Arc::clone(&checks);
            FakeTransport::new(move |request| {
                let checks = Arc::clone(&checks);
                async move {
                    match request.path.as_str() {
                        "/check-token" if checks.fetch_add(1, Ordering::SeqCst) == 0 => {
                            Ok(envelope(json!({
                                "refreshed": true, "token": "T2", "expires_at": E2
                            })))
                        }
                        "/check-token" => {
                            Ok(envelope(json!({"refreshed": false, "expires_at": E2})))
                        }
                        _ => Ok(envelope(json!({"path": request.path}))),
                    }
                }
            })
        };
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 25));

        advance_periods(1).await;
        assert_eq!(
            transport.auth_headers("/check-token"),
            vec![Some("Bearer T1".to_string())]
        );
        let stored = session.token_store().credential().unwrap();
        assert_eq!(stored.token, "T2");
        assert_eq!(stored.expires_at.to_rfc3339(), "2031-01-01T00:00:00+00:00");
        assert_eq!(session.token_store().auth_header().as_deref(), Some("T2"));

        let client = ApiClient::new(transport.clone());
        client.attach(&session);
        client.get::<Value>("/lessons").await.unwrap();
        assert_eq!(
            transport.auth_headers("/lessons"),
            vec![Some("Bearer T2".to_string())]
        );

        advance_periods(1).await;
        assert_eq!(
            transport.auth_headers("/check-token").last().cloned().flatten().as_deref(),
            Some("Bearer T2")
        );
        assert!(session.monitor_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_check_updates_expiry_only() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(envelope(json!({"refreshed": false, "expires_at": E2})))
        });
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));

        advance_periods(1).await;
        let stored = session.token_store().credential().unwrap();
        assert_eq!(stored.token, "T1");
        assert_eq!(stored.expires_at.to_rfc3339(), "2031-01-01T00:00:00+00:00");
        assert_eq!(
            session
                .token_store()
                .storage()
                .get("token_expires_at")
                .unwrap()
                .as_deref(),
            Some("2031-01-01T00:00:00+00:00")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_check_and_failed_renewal_logs_out() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(status(StatusCode::UNAUTHORIZED))
        });
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));

        advance_periods(1).await;
        assert_eq!(transport.count("/check-token"), 1);
        assert_eq!(transport.count("/refresh"), 1);
        assert!(!session.is_authenticated());
        assert_eq!(session.user(), None);
        assert_eq!(session.error().as_deref(), Some(SESSION_EXPIRED_MESSAGE));
        assert!(!session.monitor_running());

        advance_periods(3).await;
        assert_eq!(transport.count("/check-token"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_keeps_checking() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(status(StatusCode::SERVICE_UNAVAILABLE))
        });
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));

        advance_periods(3).await;
        assert_eq!(transport.count("/check-token"), 3);
        assert!(session.is_authenticated());
        assert!(session.monitor_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_stops_checks() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(envelope(json!({"refreshed": false, "expires_at": E2})))
        });
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));
        advance_periods(1).await;

        session.logout().await;
        assert!(!session.monitor_running());
        advance_periods(5).await;
        assert_eq!(transport.count("/check-token"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_loop() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(envelope(json!({"refreshed": false, "expires_at": E2})))
        });
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));
        session.adopt(credential("T1", 30));

        advance_periods(2).await;
        assert_eq!(transport.count("/check-token"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_lets_in_flight_renewal_finish() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = {
            let gate = Arc::clone(&gate);
            FakeTransport::new(move |request| {
                let gate = Arc::clone(&gate);
                async move {
                    if request.path == "/refresh" {
                        if let Ok(permit) = gate.acquire().await {
                            permit.forget();
                        }
                        Ok(envelope(json!({"token": "T2", "expires_at": E2})))
                    } else if request.authorization() != Some("Bearer T2") {
                        Ok(status(StatusCode::UNAUTHORIZED))
                    } else if request.path == "/check-token" {
                        Ok(envelope(json!({"refreshed": false, "expires_at": E2})))
                    } else {
                        Ok(envelope(json!({"path": request.path})))
                    }
                }
            })
        };
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));
        let client = ApiClient::new(transport.clone());
        client.attach(&session);

        // The monitor's check is rejected and starts a renewal that blocks
        advance_periods(1).await;
        assert_eq!(transport.count("/refresh"), 1);

        let queued = {
            let client = client.clone();
            tokio::spawn(async move { client.get::<Value>("/lessons").await })
        };
        wait_until(|| session.refresh_waiters() == 1).await;

        session.adopt(credential("T1", 30));
        gate.add_permits(1);

        assert_eq!(queued.await.unwrap().unwrap(), json!({"path": "/lessons"}));
        assert_eq!(transport.count("/refresh"), 1);
        assert_eq!(session.token_store().token().as_deref(), Some("T2"));
        assert!(session.is_authenticated());
        assert!(session.monitor_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_ends_loop() {
        let transport = FakeTransport::new(|_request| async move {
            Ok(envelope(json!({"refreshed": false, "expires_at": E2})))
        });
        let session = test_session(transport.clone());
        session.adopt(credential("T1", 30));
        drop(session);

        advance_periods(3).await;
        assert_eq!(transport.count("/check-token"), 0);
    }
}
