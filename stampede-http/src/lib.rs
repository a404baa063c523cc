//! HTTP client functionality for Stampede
//!
//! This crate is the boundary between the load engine and the system under
//! test: a small [`HttpClient`] trait that reports status, body and timing for
//! every call, a reqwest-backed implementation with connection pooling, and an
//! offline mock mode used by tests and dry runs.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-export main types for convenience
pub use client::{HttpClient, HttpManager, MockResponse};
pub use config::HttpConfig;
pub use errors::HttpError;
pub use types::{HttpMethod, HttpMethodError, HttpRequest, HttpResponse};
