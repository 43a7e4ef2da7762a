//! Authentication and session management.
//!
//! This module provides:
//! - `Session`: login, registration, logout, restore and published state
//! - `TokenStore`: the persisted credential plus the in-memory auth header
//! - `RefreshCoordinator`: at most one token renewal in flight at a time
//! - `RequestInterceptor` / `ResponseInterceptor`: token attach and 401 replay
//! - `SessionMonitor`: periodic `/check-token` while logged in
//! - `ActivityMonitor`: user interaction and busy tracking
//! - `CredentialStore`: optional OS keychain storage for saved passwords

pub mod activity;
pub mod backend;
pub mod credentials;
pub mod interceptor;
pub mod monitor;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod token_store;

pub use activity::{ActivityKind, ActivityMonitor, ActivityState, BusyGuard};
pub use credentials::CredentialStore;
pub use interceptor::{RequestInterceptor, ResponseInterceptor};
pub use monitor::SessionMonitor;
pub use refresh::{RefreshCoordinator, RefreshError, RefreshOutcome};
pub use session::{ExpiryNotice, Session, SessionState, TokenStatus, SESSION_EXPIRED_MESSAGE};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use token_store::TokenStore;
