//! SQLCoach core library.
//!
//! This crate owns everything the client needs to talk to the SQLCoach
//! backend without the UI caring about credentials:
//! - `api`: the HTTP transport seam and the `ApiClient` used for every call
//! - `auth`: token storage, single-flight renewal, interceptors, the
//!   background session monitor, activity tracking and the `Session` façade
//! - `cache`: per-user cached application data
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError, HttpTransport, ReqwestTransport};
pub use auth::{Session, SessionState};
pub use config::Config;
pub use models::{Credential, User};
