//! Manifest retrieval shared by every resolver.

use tracing::{debug, info, instrument};

use super::{ManifestLocation, ResolutionError, ResolveContext, ResolvedManifest};
use crate::manifest::{CanonicalManifestReference, Manifest};
use crate::transport::{RetryDecision, TransportError, classify_error};

/// Fetches, parses and wraps the manifest at `location`.
///
/// Transport failures are retried per the context's policy; the last one is
/// reported as [`ResolutionError::NetworkFailure`]. An HTML challenge page
/// is a `Blocking` failure and waits at least the policy's blocking floor
/// before the next attempt. Unparseable non-HTML bodies are
/// [`ResolutionError::MalformedManifest`].
#[instrument(skip(ctx, location), fields(manifest_url = %location.manifest_url))]
pub(super) async fn load_manifest(
    source_id: &'static str,
    input: &str,
    location: ManifestLocation,
    ctx: &ResolveContext,
) -> Result<ResolvedManifest, ResolutionError> {
    let url = location.manifest_url.as_str();
    let mut attempt = 0u32;

    let document = loop {
        attempt += 1;
        match ctx.transport.fetch_json(url).await {
            Ok(document) => break document,
            Err(TransportError::Malformed { reason, .. }) => {
                return Err(ResolutionError::malformed_manifest(url, &reason));
            }
            Err(error) => match ctx.retry_policy.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry { delay, .. } => {
                    let delay = error.retry_after().map_or(delay, |mandated| mandated.max(delay));
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying manifest fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, %reason, "giving up on manifest fetch");
                    return Err(ResolutionError::network_failure(
                        input,
                        url,
                        &error.to_string(),
                    ));
                }
            },
        }
    };

    let manifest = Manifest::from_json(document)
        .map_err(|error| ResolutionError::malformed_manifest(url, &error.to_string()))?;

    let reference = CanonicalManifestReference::new(
        source_id,
        location.manifest_url.clone(),
        location.document_id,
        manifest.label().map(str::to_string),
        manifest.native_pdf_url().map(str::to_string),
    );

    info!(
        document_id = reference.document_id(),
        pages = manifest.pages().len(),
        native_pdf = reference.native_pdf_url().is_some(),
        "manifest resolved"
    );

    Ok(ResolvedManifest {
        reference,
        manifest,
    })
}
