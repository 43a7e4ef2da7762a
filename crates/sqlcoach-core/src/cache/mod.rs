//! Local caching of per-user application data.
//!
//! This module provides the `ProgressCache` for storing lesson progress and
//! similar data next to the session credential. Entries are keyed by user id
//! and removed together with the credential on logout or session expiry.

pub mod manager;

pub use manager::{progress_prefix, CachedData, ProgressCache};
