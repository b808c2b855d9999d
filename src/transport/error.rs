//! Error types for transport operations.
//!
//! Every variant carries the URL (or local path) it happened on, so a
//! failure recorded in a page outcome is self-explanatory in the final
//! job summary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::retry::parse_retry_after;

/// Errors produced by a single transport attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection reset, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Raw Retry-After header value, if the server sent one.
        retry_after: Option<String>,
    },

    /// The server answered with an HTML page where binary content was expected.
    ///
    /// Digital-library WAFs answer challenged clients with `200 text/html`.
    #[error("challenge page served for {url} (content-type {content_type})")]
    ChallengePage {
        /// The URL that was challenged.
        url: String,
        /// The content type actually received.
        content_type: String,
    },

    /// The body could not be interpreted (empty, not JSON, truncated).
    #[error("malformed response from {url}: {reason}")]
    Malformed {
        /// The URL whose body was rejected.
        url: String,
        /// What was wrong with the body.
        reason: String,
    },

    /// File system error while persisting a body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest error, splitting timeouts and builder (URL) errors out.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else if source.is_builder() {
            Self::InvalidUrl { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error with an optional Retry-After header value.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a challenge-page error.
    pub fn challenge_page(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::ChallengePage {
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    /// Creates a malformed-body error.
    pub fn malformed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Server-mandated wait parsed from a Retry-After header, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus {
                retry_after: Some(value),
                ..
            } => parse_retry_after(value),
            _ => None,
        }
    }
}
