//! Data models for the SQLCoach backend.
//!
//! - `user`: the authenticated user and the stored credential
//! - `envelope`: the `{success, data, message}` wrapper and auth payloads

pub mod envelope;
pub mod user;

pub use envelope::{
    ApiEnvelope, AuthPayload, LoginRequest, RefreshPayload, RegisterRequest, TokenCheck,
};
pub use user::{Credential, User};
