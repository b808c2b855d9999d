//! Shared HTTP client used for every outbound request.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::TransportError;
use crate::user_agent;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// What the caller expects the response body to be.
///
/// Drives the `Accept` header and the challenge-page check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// IIIF manifest (JSON or JSON-LD).
    Manifest,
    /// A page image.
    Image,
    /// A native PDF.
    Pdf,
}

impl PayloadKind {
    fn accept_header(self) -> &'static str {
        match self {
            Self::Manifest => "application/ld+json, application/json;q=0.9, */*;q=0.8",
            Self::Image => "image/avif,image/webp,image/apng,image/*,*/*;q=0.8",
            Self::Pdf => "application/pdf,*/*;q=0.8",
        }
    }

    fn is_binary(self) -> bool {
        matches!(self, Self::Image | Self::Pdf)
    }
}

/// Timeouts applied to every request made through a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout, including body download.
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Browser-like HTTP client shared by resolvers and the download executor.
///
/// Cloning is cheap and shares the connection pool and cookie store, so WAF
/// clearance cookies obtained by one request are presented by the next.
/// Every method performs exactly one attempt; retrying is the caller's job.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Builds the shared client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientBuild`] if the TLS backend or client
    /// configuration cannot be initialized.
    #[instrument(level = "debug")]
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .cookie_store(true)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .zstd(true)
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;
        Ok(Self { client })
    }

    /// Fetches and parses a JSON document.
    ///
    /// Bodies that fail to parse are retried once with a leading UTF-8 BOM
    /// and surrounding whitespace stripped.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChallengePage`] when an HTML page arrives
    /// instead of JSON, [`TransportError::Malformed`] if the body is empty
    /// or otherwise not JSON, or the underlying network failure.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, TransportError> {
        let response = self.send(url, PayloadKind::Manifest).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;

        match parse_json_body(url, &body) {
            Err(TransportError::Malformed { .. }) if looks_like_html(&content_type, &body) => {
                let content_type = if content_type.is_empty() {
                    "text/html (sniffed)".to_string()
                } else {
                    content_type
                };
                Err(TransportError::challenge_page(url, content_type))
            }
            parsed => parsed,
        }
    }

    /// Streams a binary body to `dest`.
    ///
    /// The body is written to `<dest>.part` and renamed onto `dest` only
    /// after a complete, flushed write, so `dest` never holds a truncated
    /// file. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChallengePage`] when an HTML page arrives
    /// instead of the expected binary, [`TransportError::Malformed`] for an
    /// empty body, or the underlying network/IO failure.
    #[instrument(skip(self, dest), fields(url = %url, dest = %dest.display()))]
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        kind: PayloadKind,
    ) -> Result<u64, TransportError> {
        let response = self.send(url, kind).await?;

        if kind.is_binary() {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase();
            if content_type.starts_with("text/html") {
                return Err(TransportError::challenge_page(url, content_type));
            }
        }

        let part_path = part_path_for(dest);
        let mut file = File::create(&part_path)
            .await
            .map_err(|e| TransportError::io(&part_path, e))?;

        let written = match stream_to_file(&mut file, response, url, &part_path).await {
            Ok(0) => Err(TransportError::malformed(url, "empty body")),
            other => other,
        };
        drop(file);

        match written {
            Ok(bytes) => {
                tokio::fs::rename(&part_path, dest)
                    .await
                    .map_err(|e| TransportError::io(dest, e))?;
                debug!(bytes, "body persisted");
                Ok(bytes)
            }
            Err(error) => {
                // A stale .part is never read back.
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(error)
            }
        }
    }

    async fn send(
        &self,
        url: &str,
        kind: PayloadKind,
    ) -> Result<reqwest::Response, TransportError> {
        let profile = user_agent::pick_profile();
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, profile.user_agent)
            .header(ACCEPT_LANGUAGE, profile.accept_language)
            .header(ACCEPT, kind.accept_header())
            .header("DNT", "1")
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(TransportError::http_status(url, status.as_u16(), retry_after));
        }

        Ok(response)
    }
}

fn part_path_for(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, TransportError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| TransportError::from_reqwest(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransportError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| TransportError::io(file_path, e))?;

    Ok(bytes_written)
}

/// HTML by declared type, or by a body opening with a markup tag.
fn looks_like_html(content_type: &str, body: &[u8]) -> bool {
    if content_type.starts_with("text/html") {
        return true;
    }
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    body.iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|&byte| byte == b'<')
}

fn parse_json_body(url: &str, body: &[u8]) -> Result<serde_json::Value, TransportError> {
    if body.is_empty() {
        return Err(TransportError::malformed(url, "empty body"));
    }
    match serde_json::from_slice(body) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            let stripped = body.strip_prefix(UTF8_BOM).unwrap_or(body);
            let text = String::from_utf8_lossy(stripped);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(TransportError::malformed(url, "empty body"));
            }
            serde_json::from_str(trimmed).map_err(|_| {
                TransportError::malformed(url, format!("invalid JSON: {first_error}"))
            })
        }
    }
}
