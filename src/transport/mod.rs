//! Resilient transport: one shared, browser-like HTTP client plus the
//! failure classification and retry policy its callers apply.
//!
//! - [`Transport`] - single-attempt fetches (JSON manifests, page images, PDFs)
//! - [`TransportError`] - what went wrong, with the URL or path attached
//! - [`classify_error`] / [`FailureType`] - Transient, Blocking or Permanent
//! - [`RetryPolicy`] - bounded attempts with exponential backoff and jitter

mod client;
mod error;
mod retry;

pub use client::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, PayloadKind, Transport,
    TransportSettings,
};
pub use error::TransportError;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after,
};
