//! Catch-all resolver: any http(s) URL is taken as a IIIF manifest URL.

use async_trait::async_trait;

use super::fetch::load_manifest;
use super::utils::{derive_identifier, parse_web_url};
use super::{
    ManifestLocation, ResolutionError, ResolveContext, ResolvedManifest, Resolver,
    ResolverPriority,
};

/// Fallback resolver for direct manifest URLs.
#[derive(Debug, Clone, Default)]
pub struct GenericResolver;

impl GenericResolver {
    /// Creates a new generic resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Uses the URL verbatim; the document id is derived from it.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Unrecognized`] if `input` is not an http(s) URL.
    pub fn locate(&self, input: &str) -> Result<ManifestLocation, ResolutionError> {
        let url = parse_web_url(input)
            .ok_or_else(|| ResolutionError::unsupported(input, "not an http(s) URL"))?;
        Ok(ManifestLocation {
            document_id: derive_identifier(&url),
            manifest_url: input.to_string(),
        })
    }
}

#[async_trait]
impl Resolver for GenericResolver {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Fallback
    }

    fn matches(&self, input: &str) -> bool {
        parse_web_url(input).is_some()
    }

    async fn resolve(
        &self,
        input: &str,
        ctx: &ResolveContext,
    ) -> Result<ResolvedManifest, ResolutionError> {
        let location = self.locate(input)?;
        load_manifest(self.name(), input, location, ctx).await
    }
}
