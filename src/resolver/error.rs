//! Error types for resolution, following the What/Why/Fix pattern used
//! across the project.

use thiserror::Error;

/// Errors that end resolution before any download begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No resolver recognized the input, or the matching resolver could not
    /// extract an identifier from it.
    #[error("unrecognized input '{input}': {reason}\n  Suggestion: {suggestion}")]
    Unrecognized {
        /// The input as received.
        input: String,
        /// Why it was not recognized.
        reason: String,
        /// How to fix the issue.
        suggestion: String,
    },

    /// A resolver matched but fetching its manifest failed.
    #[error("network failure resolving '{input}' via {manifest_url}: {reason}\n  Suggestion: {suggestion}")]
    NetworkFailure {
        /// The input as received.
        input: String,
        /// The manifest URL that could not be fetched.
        manifest_url: String,
        /// The final transport error.
        reason: String,
        /// How to fix the issue.
        suggestion: String,
    },

    /// The manifest was fetched but is not a usable IIIF document.
    #[error("malformed manifest at {manifest_url}: {reason}\n  Suggestion: {suggestion}")]
    MalformedManifest {
        /// The manifest URL.
        manifest_url: String,
        /// What is wrong with it.
        reason: String,
        /// How to fix the issue.
        suggestion: String,
    },
}

impl ResolutionError {
    /// No registered resolver matched `input`.
    #[must_use]
    pub fn unrecognized(input: &str) -> Self {
        Self::Unrecognized {
            input: input.to_string(),
            reason: "no resolver matched this input".to_string(),
            suggestion:
                "Pass a shelfmark (e.g. 'Urb. lat. 1779'), a library viewer URL, or a IIIF manifest URL"
                    .to_string(),
        }
    }

    /// A resolver matched `input` but could not extract an identifier.
    #[must_use]
    pub fn unsupported(input: &str, reason: &str) -> Self {
        Self::Unrecognized {
            input: input.to_string(),
            reason: reason.to_string(),
            suggestion: "Pass the manuscript's viewer URL or its IIIF manifest URL".to_string(),
        }
    }

    /// The manifest lookup failed after the retry budget was spent.
    #[must_use]
    pub fn network_failure(input: &str, manifest_url: &str, reason: &str) -> Self {
        Self::NetworkFailure {
            input: input.to_string(),
            manifest_url: manifest_url.to_string(),
            reason: reason.to_string(),
            suggestion: "Check connectivity and that the manuscript exists; \
                         retry later if the library is throttling"
                .to_string(),
        }
    }

    /// The manifest document could not be parsed.
    #[must_use]
    pub fn malformed_manifest(manifest_url: &str, reason: &str) -> Self {
        Self::MalformedManifest {
            manifest_url: manifest_url.to_string(),
            reason: reason.to_string(),
            suggestion: "Open the manifest URL in a browser to confirm it is a IIIF \
                         Presentation manifest"
                .to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_display() {
        let msg = ResolutionError::unrecognized("hello world").to_string();
        assert!(msg.contains("hello world"), "Expected input in: {msg}");
        assert!(msg.contains("Suggestion:"), "Expected suggestion in: {msg}");
    }

    #[test]
    fn test_network_failure_display() {
        let msg = ResolutionError::network_failure(
            "Urb. lat. 1779",
            "https://digi.vatlib.it/iiif/MSS_Urb.lat.1779/manifest.json",
            "HTTP 503",
        )
        .to_string();
        assert!(msg.contains("MSS_Urb.lat.1779/manifest.json"));
        assert!(msg.contains("HTTP 503"));
    }

    #[test]
    fn test_malformed_manifest_display() {
        let msg = ResolutionError::malformed_manifest(
            "https://example.org/m.json",
            "manifest has no canvases",
        )
        .to_string();
        assert!(msg.starts_with("malformed manifest"));
        assert!(msg.contains("no canvases"));
    }
}
