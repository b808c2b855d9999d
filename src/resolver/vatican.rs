//! Biblioteca Apostolica Vaticana: shelfmarks and `digi.vatlib.it` URLs.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::fetch::load_manifest;
use super::utils::{compile_static_regex, is_url_on_domain, parse_web_url, path_segments};
use super::{
    ManifestLocation, ResolutionError, ResolveContext, ResolvedManifest, Resolver,
    ResolverPriority,
};

const DEFAULT_BASE_URL: &str = "https://digi.vatlib.it";
const VATICAN_DOMAIN: &str = "digi.vatlib.it";

/// `<fondo>[sep]<series>?[sep]<number>`, separators being dots and/or spaces,
/// optionally prefixed `MSS_` (the library's own document id form). The
/// fondo must be one of the library's manuscript collections.
static SHELFMARK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(concat!(
        r"(?i)^(?:mss_)?",
        r"(vat|urb|pal|reg|barb|ott|borg|borgh|ross|chig|cappon|ferr|neofiti|sbath|patetta)",
        r"[.\s]+(?:([a-z]+)[.\s]+)?(\d+[a-z]?)$"
    ))
});

/// Specialized resolver for Vatican Library manuscripts.
#[derive(Debug, Clone)]
pub struct VaticanResolver {
    base_url: String,
}

impl VaticanResolver {
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
    /// Returns [`ResolutionError::Unrecognized`] for viewer URLs that carry
    /// no document id.
    pub fn locate(&self, input: &str) -> Result<ManifestLocation, ResolutionError> {
        let document_id = if let Some(url) = parse_web_url(input) {
            let segments = path_segments(&url);
            segments
                .iter()
                .rev()
                .find(|segment| !segment.eq_ignore_ascii_case("manifest.json"))
                .map(|segment| normalize_shelfmark(segment).unwrap_or_else(|| segment.clone()))
                .filter(|id| id.to_ascii_uppercase().starts_with("MSS_"))
                .ok_or_else(|| {
                    ResolutionError::unsupported(input, "no manuscript id in Vatican URL")
                })?
        } else {
            normalize_shelfmark(input)
                .ok_or_else(|| ResolutionError::unsupported(input, "not a Vatican shelfmark"))?
        };

        Ok(ManifestLocation {
            manifest_url: format!("{}/iiif/{document_id}/manifest.json", self.base_url),
            document_id,
        })
    }
}

impl Default for VaticanResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical `MSS_<Fondo>.<series>.<number>` form of a shelfmark.
///
/// `Urb. lat. 1779`, `urb lat 1779` and `MSS_URB.LAT.1779` all normalize to
/// `MSS_Urb.lat.1779`.
#[must_use]
pub fn normalize_shelfmark(raw: &str) -> Option<String> {
    let caps = SHELFMARK_RE.captures(raw.trim())?;
    let fondo = capitalize(&caps[1]);
    let number = caps[3].to_ascii_lowercase();
    let id = match caps.get(2) {
        Some(series) => format!("MSS_{fondo}.{}.{number}", series.as_str().to_ascii_lowercase()),
        None => format!("MSS_{fondo}.{number}"),
    };
    Some(id)
}

fn capitalize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[async_trait]
impl Resolver for VaticanResolver {
    fn name(&self) -> &'static str {
        "vatican"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Specialized
    }

    fn matches(&self, input: &str) -> bool {
        if parse_web_url(input).is_some() {
            return is_url_on_domain(input, VATICAN_DOMAIN);
        }
        SHELFMARK_RE.is_match(input.trim())
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
