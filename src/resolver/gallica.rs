//! Gallica (Bibliothèque nationale de France): ARK identifiers.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::fetch::load_manifest;
use super::utils::{compile_static_regex, is_url_on_domain, parse_web_url};
use super::{
    ManifestLocation, ResolutionError, ResolveContext, ResolvedManifest, Resolver,
    ResolverPriority,
};

const DEFAULT_BASE_URL: &str = "https://gallica.bnf.fr";
const GALLICA_DOMAIN: &str = "gallica.bnf.fr";

/// BnF's ARK name assigning authority.
static BNF_ARK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)ark:/12148/([a-z0-9]+)"));

/// Bare Gallica object name such as `btv1b8452439z`.
static SHORT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)^[a-z][a-z0-9]{5,}$"));

/// Specialized resolver for Gallica documents.
#[derive(Debug, Clone)]
pub struct GallicaResolver {
    base_url: String,
}

impl GallicaResolver {
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
    /// Viewer URLs, page URLs (`.../f12.item`), legacy manifest URLs and
    /// bare ids all converge on `/iiif/ark:/12148/<id>/manifest.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Unrecognized`] for Gallica URLs without an ARK.
    pub fn locate(&self, input: &str) -> Result<ManifestLocation, ResolutionError> {
        let document_id = if let Some(caps) = BNF_ARK_RE.captures(input) {
            caps[1].to_ascii_lowercase()
        } else if is_short_id(input) {
            input.trim().to_ascii_lowercase()
        } else {
            return Err(ResolutionError::unsupported(
                input,
                "no ark:/12148/ identifier in Gallica input",
            ));
        };

        Ok(ManifestLocation {
            manifest_url: format!(
                "{}/iiif/ark:/12148/{document_id}/manifest.json",
                self.base_url
            ),
            document_id,
        })
    }
}

impl Default for GallicaResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_short_id(input: &str) -> bool {
    let input = input.trim();
    SHORT_ID_RE.is_match(input) && input.chars().any(|c| c.is_ascii_digit())
}

#[async_trait]
impl Resolver for GallicaResolver {
    fn name(&self) -> &'static str {
        "gallica"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Specialized
    }

    fn matches(&self, input: &str) -> bool {
        if parse_web_url(input).is_some() {
            return is_url_on_domain(input, GALLICA_DOMAIN);
        }
        BNF_ARK_RE.is_match(input) || is_short_id(input)
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CANONICAL: &str = "https://gallica.bnf.fr/iiif/ark:/12148/btv1b8452439z/manifest.json";

    #[test]
    fn test_locate_converges_on_canonical_manifest() {
        let resolver = GallicaResolver::new();
        for input in [
            "btv1b8452439z",
            "ark:/12148/btv1b8452439z",
            "https://gallica.bnf.fr/ark:/12148/btv1b8452439z",
            "https://gallica.bnf.fr/ark:/12148/btv1b8452439z.image",
            "https://gallica.bnf.fr/ark:/12148/btv1b8452439z/f12.item",
            "https://gallica.bnf.fr/ark:/12148/btv1b8452439z/manifest.json",
            CANONICAL,
        ] {
            let location = resolver.locate(input).unwrap();
            assert_eq!(location.manifest_url, CANONICAL, "input {input:?}");
            assert_eq!(location.document_id, "btv1b8452439z");
        }
    }

    #[test]
    fn test_matches() {
        let resolver = GallicaResolver::new();
        assert!(resolver.matches("btv1b8452439z"));
        assert!(resolver.matches("ark:/12148/bpt6k1234567"));
        assert!(resolver.matches("https://gallica.bnf.fr/services/engine/search"));
        assert!(!resolver.matches("manuscript"), "short ids must contain a digit");
        assert!(!resolver.matches("12345678"), "short ids must start with a letter");
        assert!(!resolver.matches("https://example.org/ark:/12148/btv1b8452439z"));
        assert!(!resolver.matches("Urb. lat. 1779"));
    }

    #[test]
    fn test_locate_gallica_url_without_ark() {
        let result =
            GallicaResolver::new().locate("https://gallica.bnf.fr/accueil/fr/content/accueil-fr");
        assert!(matches!(result, Err(ResolutionError::Unrecognized { .. })));
    }
}
