//! Bodleian Libraries (Oxford): object UUIDs.

use async_trait::async_trait;

use super::fetch::load_manifest;
use super::utils::{UUID_RE, is_url_on_domain, parse_web_url};
use super::{
    ManifestLocation, ResolutionError, ResolveContext, ResolvedManifest, Resolver,
    ResolverPriority,
};

const DEFAULT_BASE_URL: &str = "https://iiif.bodleian.ox.ac.uk";
const BODLEIAN_DOMAIN: &str = "bodleian.ox.ac.uk";

/// Specialized resolver for Digital Bodleian objects.
#[derive(Debug, Clone)]
pub struct OxfordResolver {
    base_url: String,
}

impl OxfordResolver {
    /// Creates a resolver against the production IIIF endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a resolver with a custom manifest host (for tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Maps a claimed input to its manifest, without network access.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Unrecognized`] for Bodleian URLs without a UUID.
    pub fn locate(&self, input: &str) -> Result<ManifestLocation, ResolutionError> {
        let uuid = UUID_RE
            .find(input)
            .map(|m| m.as_str().to_ascii_lowercase())
            .ok_or_else(|| {
                ResolutionError::unsupported(input, "no object UUID in Bodleian input")
            })?;

        Ok(ManifestLocation {
            manifest_url: format!("{}/iiif/manifest/{uuid}.json", self.base_url),
            document_id: uuid,
        })
    }
}

impl Default for OxfordResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_bare_uuid(input: &str) -> bool {
    let input = input.trim();
    UUID_RE.find(input).is_some_and(|m| m.len() == input.len())
}

#[async_trait]
impl Resolver for OxfordResolver {
    fn name(&self) -> &'static str {
        "oxford"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Specialized
    }

    fn matches(&self, input: &str) -> bool {
        if parse_web_url(input).is_some() {
            return is_url_on_domain(input, BODLEIAN_DOMAIN);
        }
        is_bare_uuid(input)
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
