//! The session façade.
//!
//! `Session` is the only surface the rest of the client touches: it logs in,
//! registers, logs out, restores a stored credential on startup and
//! publishes `SessionState` for whatever renders it. Cloning is cheap; every
//! clone shares the same token store, renewal lock and monitor.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::activity::ActivityMonitor;
use super::backend::{AuthBackend, CHECK_TOKEN_PATH};
use super::interceptor::ResponseInterceptor;
use super::monitor::SessionMonitor;
use super::refresh::{RefreshCoordinator, RefreshError, RefreshOutcome};
use super::storage::KeyValueStore;
use super::TokenStore;
use crate::api::transport::{ApiRequest, HttpTransport};
use crate::api::ApiError;
use crate::cache::ProgressCache;
use crate::config::Config;
use crate::models::{Credential, RegisterRequest, TokenCheck, User};

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// What the UI renders: who is logged in, whether an auth call is running,
/// and the last user-facing error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<User>,
    pub loading: bool,
    pub error: Option<String>,
}

impl SessionState {
    fn logged_out(error: Option<String>) -> Self {
        Self {
            user: None,
            loading: false,
            error,
        }
    }
}

/// Result of a `/check-token` round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// The backend issued a new token
    Refreshed,
    /// The current token is still valid; only its expiry was updated
    Valid,
}

/// Advisory data for an expiry warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotice {
    pub remaining: chrono::Duration,
    /// The user is busy or recently active, so a countdown can stay hidden
    pub suppressed: bool,
}

pub(crate) struct SessionInner {
    store: TokenStore,
    backend: AuthBackend,
    coordinator: RefreshCoordinator,
    activity: ActivityMonitor,
    monitor: SessionMonitor,
    state: watch::Sender<SessionState>,
    expiry_warning: Duration,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState {
            user: None,
            loading: true,
            error: None,
        });
        Self {
            inner: Arc::new(SessionInner {
                store: TokenStore::new(storage),
                backend: AuthBackend::new(transport),
                coordinator: RefreshCoordinator::new(),
                activity: ActivityMonitor::new(config.activity_window()),
                monitor: SessionMonitor::new(config.session_check_interval()),
                state,
                expiry_warning: config.expiry_warning(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Read the stored credential. Must run inside a tokio runtime, since a
    /// live credential starts the session monitor.
    pub fn restore(&self) -> Option<User> {
        let loaded = match self.inner.store.load() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Failed to load stored session");
                None
            }
        };

        match loaded {
            Some(credential) if !credential.is_expired() => {
                debug!(
                    user_id = credential.user.id,
                    minutes_left = credential.minutes_until_expiry(),
                    "Stored session restored"
                );
                let user = credential.user.clone();
                self.establish(credential);
                Some(user)
            }
            Some(_) => {
                info!("Stored session has expired");
                self.clear_local();
                self.inner.state.send_replace(SessionState::logged_out(None));
                None
            }
            None => {
                self.inner.state.send_replace(SessionState::logged_out(None));
                None
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(self.fail(ApiError::Validation(
                "Email and password required".to_string(),
            )));
        }

        self.begin_loading();
        match self.inner.backend.login(email.trim(), password).await {
            Ok(credential) => {
                info!(user_id = credential.user.id, "Login successful");
                Ok(self.establish(credential))
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                Err(self.fail(e))
            }
        }
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        password_confirmation: &str,
    ) -> Result<User, ApiError> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(self.fail(ApiError::Validation(
                "Name, email and password required".to_string(),
            )));
        }
        if password != password_confirmation {
            return Err(self.fail(ApiError::Validation(
                "Passwords do not match".to_string(),
            )));
        }

        self.begin_loading();
        let form = RegisterRequest {
            name: name.trim(),
            email: email.trim(),
            password,
            password_confirmation,
        };
        match self.inner.backend.register(&form).await {
            Ok(credential) => {
                info!(user_id = credential.user.id, "Registration successful");
                Ok(self.establish(credential))
            }
            Err(e) => {
                error!(error = %e, "Registration failed");
                Err(self.fail(e))
            }
        }
    }

    /// Tell the backend (best effort), then drop every trace of the session.
    pub async fn logout(&self) {
        self.begin_loading();
        if let Some(token) = self.inner.store.auth_header() {
            if let Err(e) = self.inner.backend.logout(&token).await {
                warn!(error = %e, "Backend logout failed, clearing local session anyway");
            }
        }
        self.clear_local();
        self.inner.state.send_replace(SessionState::logged_out(None));
        info!("Logged out");
    }

    /// Install a credential obtained outside login/register
    pub fn adopt(&self, credential: Credential) -> User {
        self.establish(credential)
    }

    fn establish(&self, credential: Credential) -> User {
        if let Err(e) = self.inner.store.save(&credential) {
            warn!(error = %e, "Failed to save session");
        }
        self.inner.store.set_auth_header(Some(&credential.token));
        self.inner.state.send_replace(SessionState {
            user: Some(credential.user.clone()),
            loading: false,
            error: None,
        });
        self.inner.monitor.start(self.downgrade());
        credential.user
    }

    fn clear_local(&self) {
        self.inner.monitor.stop();
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
    }

    /// End the session after an unrecoverable authentication failure
    pub(crate) fn expire(&self, reason: &str) {
        warn!(reason, "Session ended");
        self.clear_local();
        self.inner
            .state
            .send_replace(SessionState::logged_out(Some(reason.to_string())));
    }

    fn begin_loading(&self) {
        self.inner.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
    }

    /// Record a user-facing message for `e` and hand the error back
    fn fail(&self, e: ApiError) -> ApiError {
        let message = describe_auth_error(&e);
        self.inner.state.send_modify(|state| {
            state.loading = false;
            state.error = Some(message);
        });
        e
    }

    // =========================================================================
    // Token renewal
    // =========================================================================

    /// Renew the stored token, or join the renewal already in flight
    pub(crate) async fn renew(&self) -> RefreshOutcome {
        let inner = &self.inner;
        inner
            .coordinator
            .run(move || async move {
                let Some(current) = inner.store.credential() else {
                    return Err(RefreshError::NoToken);
                };
                match inner.backend.refresh(&current.token).await {
                    Ok(payload) => {
                        let renewed =
                            Credential::new(payload.token, payload.expires_at, current.user);
                        match inner.store.replace_if_current(&current.token, &renewed) {
                            Ok(true) => {}
                            Ok(false) => {
                                info!("Session changed during renewal, discarding new token");
                                return Err(RefreshError::Abandoned);
                            }
                            Err(e) => warn!(error = %e, "Failed to save renewed token"),
                        }
                        info!(expires_at = %renewed.expires_at, "Token renewed");
                        Ok(renewed.token)
                    }
                    Err(e) if inner.store.token().as_deref() != Some(current.token.as_str()) => {
                        debug!(error = %e, "Renewal failed after the session changed");
                        Err(RefreshError::Abandoned)
                    }
                    Err(e) => {
                        warn!(error = %e, "Token renewal failed");
                        self.expire(SESSION_EXPIRED_MESSAGE);
                        Err(RefreshError::Rejected(e.to_string()))
                    }
                }
            })
            .await
    }

    /// Ask the backend whether the token is still good, adopting whatever it
    /// answers. A 401 goes through the same renewal path as any request.
    ///
    /// Answers only apply to the token the check was sent with; if a renewal
    /// or logout replaced it meanwhile, the newer state is kept.
    pub async fn check_token(&self) -> Result<TokenStatus, ApiError> {
        let user = self.inner.store.user().ok_or(ApiError::NotAuthenticated)?;

        let (response, sent) = ResponseInterceptor::new(self)
            .dispatch_tracked(
                self.inner.backend.transport(),
                ApiRequest::get(CHECK_TOKEN_PATH),
            )
            .await?;
        let check: TokenCheck = response.into_data()?;
        let Some(sent) = sent else {
            return Err(ApiError::NotAuthenticated);
        };

        let (updated, status) = match check.token {
            Some(token) if check.refreshed => (
                Credential::new(token, check.expires_at, user),
                TokenStatus::Refreshed,
            ),
            _ => (
                Credential::new(sent.clone(), check.expires_at, user),
                TokenStatus::Valid,
            ),
        };

        match self.inner.store.replace_if_current(&sent, &updated) {
            Ok(true) => {}
            Ok(false) if self.is_authenticated() => {
                debug!("Token changed during check, keeping the newer one");
                return Ok(TokenStatus::Valid);
            }
            Ok(false) => {
                debug!("Session ended during token check");
                return Err(ApiError::NotAuthenticated);
            }
            Err(e) => warn!(error = %e, "Failed to save token check result"),
        }
        if status == TokenStatus::Refreshed {
            info!(expires_at = %updated.expires_at, "Token refreshed by session check");
        }
        Ok(status)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|state| state.error.take().is_some());
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.store.token().is_some()
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn progress(&self) -> ProgressCache {
        ProgressCache::new(self.inner.store.storage())
    }

    pub fn activity(&self) -> &ActivityMonitor {
        &self.inner.activity
    }

    pub fn monitor_running(&self) -> bool {
        self.inner.monitor.is_running()
    }

    /// Requests currently parked behind an in-flight renewal
    pub fn refresh_waiters(&self) -> usize {
        self.inner.coordinator.waiting()
    }

    /// `Some` once the token is inside the warning window
    pub fn expiry_notice(&self) -> Option<ExpiryNotice> {
        let credential = self.inner.store.credential()?;
        let window = chrono::Duration::from_std(self.inner.expiry_warning).ok()?;
        let remaining = credential.time_until_expiry();
        if remaining > window {
            return None;
        }
        Some(ExpiryNotice {
            remaining: remaining.max(chrono::Duration::zero()),
            suppressed: self.inner.activity.should_prevent_expiration(),
        })
    }
}

/// Map an auth failure to something a user can act on
fn describe_auth_error(e: &ApiError) -> String {
    match e {
        ApiError::Unauthorized => "Invalid email or password".to_string(),
        ApiError::Validation(message) | ApiError::Rejected(message) => message.clone(),
        ApiError::RateLimited => "Too many attempts. Please wait and try again.".to_string(),
        ApiError::NetworkError(inner) if inner.is_timeout() => {
            "Connection timed out. Please try again.".to_string()
        }
        e if e.is_network() => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        ApiError::InvalidResponse(_) | ApiError::Json(_) => {
            "Unexpected response from server".to_string()
        }
        other => format!("Authentication failed: {}", other),
    }
}
