//! Shared helpers for resolvers: input normalization, host checks and
//! identifier patterns.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Any RFC 4122-shaped UUID.
pub static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    )
});

/// ARK identifier with any NAAN; group 1 is the NAAN, group 2 the object name.
pub static ARK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)ark:/(\d+)/([a-z0-9]+)"));

/// Trims and percent-decodes raw user input.
///
/// Shelfmarks copied from an address bar arrive as `Urb.%20lat.%201779`.
#[must_use]
pub fn normalize_input(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('%') {
        if let Ok(decoded) = urlencoding::decode(trimmed) {
            return decoded.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Parses `input` as an absolute http(s) URL with a host.
#[must_use]
pub fn parse_web_url(input: &str) -> Option<Url> {
    let url = Url::parse(input).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}

/// Normalizes a host string: trim, strip leading "www.", trailing '.', and lowercases.
#[must_use]
pub fn canonical_host(host: &str) -> String {
    host.trim()
        .trim_start_matches("www.")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// True if `input` is a URL on `domain` or one of its subdomains.
#[must_use]
pub fn is_url_on_domain(input: &str, domain: &str) -> bool {
    parse_web_url(input)
        .and_then(|url| url.host_str().map(canonical_host))
        .is_some_and(|host| host == domain || host.ends_with(&format!(".{domain}")))
}

/// Non-empty path segments of a URL, in order.
#[must_use]
pub fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    urlencoding::decode(segment)
                        .map_or_else(|_| segment.to_string(), std::borrow::Cow::into_owned)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Stable identifier for a manifest URL.
///
/// Priority: ARK object name, UUID, last meaningful path segment (skipping
/// `manifest.json` / `manifest`), then host. Path segments and the host say
/// nothing about a query string, so those forms get a short digest of the
/// whole URL appended whenever a query is present or the host is all
/// that is left.
#[must_use]
pub fn derive_identifier(url: &Url) -> String {
    let text = url.as_str();
    if let Some(caps) = ARK_RE.captures(text) {
        return caps[2].to_string();
    }
    if let Some(found) = UUID_RE.find(text) {
        return found.as_str().to_ascii_lowercase();
    }
    let segment = path_segments(url)
        .into_iter()
        .rev()
        .find(|segment| {
            let lower = segment.to_ascii_lowercase();
            !matches!(lower.as_str(), "manifest.json" | "manifest" | "iiif")
        })
        .map(|segment| segment.trim_end_matches(".json").to_string())
        .filter(|segment| !segment.is_empty());
    let has_query = url.query().is_some_and(|query| !query.is_empty());

    match segment {
        Some(segment) if !has_query => segment,
        Some(segment) => format!("{segment}-{}", url_digest(url)),
        None => {
            let host = url.host_str().map(canonical_host).unwrap_or_default();
            format!("{host}-{}", url_digest(url))
        }
    }
}

/// First 8 hex digits of the SHA-256 of the URL text.
fn url_digest(url: &Url) -> String {
    Sha256::digest(url.as_str().as_bytes())
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
