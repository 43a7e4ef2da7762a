//! REST API plumbing for the SQLCoach backend.
//!
//! `HttpTransport` is the seam between the client and the network;
//! `ReqwestTransport` is the production implementation. `ApiClient` sits on
//! top and is what application code calls.
//!
//! Every response uses the `{success, data, message}` envelope.

pub mod client;
pub mod error;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
