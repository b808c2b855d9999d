//! Source-agnostic manuscript model.
//!
//! A fetched IIIF manifest (Presentation 2 or 3) is reduced to an ordered
//! list of [`PageDescriptor`]s plus an optional native-PDF link. Everything
//! downstream of resolution works only on these types.

mod parse;

use serde::Serialize;

pub use parse::{ManifestError, flatten_iiif_value};

/// Fixed width of the 1-based page number in on-disk filenames.
pub const PAGE_NUMBER_WIDTH: usize = 4;

/// On-disk filename for the page at 0-based `index`.
///
/// Disk numbering is 1-based: index 0 is `pag_0001.jpg`.
#[must_use]
pub fn page_filename(index: usize) -> String {
    format!("pag_{:0width$}.jpg", index + 1, width = PAGE_NUMBER_WIDTH)
}

/// Immutable result of resolving one user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalManifestReference {
    source_id: String,
    manifest_url: String,
    document_id: String,
    display_label: String,
    native_pdf_url: Option<String>,
}

impl CanonicalManifestReference {
    /// Creates a reference. An empty label falls back to the document id.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        manifest_url: impl Into<String>,
        document_id: impl Into<String>,
        display_label: Option<String>,
        native_pdf_url: Option<String>,
    ) -> Self {
        let document_id = document_id.into();
        let display_label = display_label
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| document_id.clone());
        Self {
            source_id: source_id.into(),
            manifest_url: manifest_url.into(),
            document_id,
            display_label,
            native_pdf_url,
        }
    }

    /// Resolver that produced this reference (`"vatican"`, `"gallica"`, ...).
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Canonical IIIF manifest URL.
    #[must_use]
    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    /// Normalized library identifier (e.g. `MSS_Urb.lat.1779`).
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Human-readable title taken from the manifest.
    #[must_use]
    pub fn display_label(&self) -> &str {
        &self.display_label
    }

    /// Native PDF download, when the library offers one.
    #[must_use]
    pub fn native_pdf_url(&self) -> Option<&str> {
        self.native_pdf_url.as_deref()
    }
}

/// One manuscript page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageDescriptor {
    index: usize,
    image_service_url: Option<String>,
    fetch_url: String,
    target_filename: String,
}

impl PageDescriptor {
    /// Page backed by a IIIF Image API service; fetched at full size.
    #[must_use]
    pub fn from_service(index: usize, service_url: &str) -> Self {
        let base = normalize_service_base(service_url);
        Self {
            index,
            fetch_url: format!("{base}/full/max/0/default.jpg"),
            image_service_url: Some(base),
            target_filename: page_filename(index),
        }
    }

    /// Page with only a static image resource.
    #[must_use]
    pub fn from_resource(index: usize, resource_url: &str) -> Self {
        Self {
            index,
            image_service_url: None,
            fetch_url: resource_url.to_string(),
            target_filename: page_filename(index),
        }
    }

    /// 0-based position in the manuscript.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// IIIF Image API base URL, when the canvas exposes a service.
    #[must_use]
    pub fn image_service_url(&self) -> Option<&str> {
        self.image_service_url.as_deref()
    }

    /// URL the executor downloads.
    #[must_use]
    pub fn fetch_url(&self) -> &str {
        &self.fetch_url
    }

    /// `pag_NNNN.jpg`, derived from the index alone.
    #[must_use]
    pub fn target_filename(&self) -> &str {
        &self.target_filename
    }
}

fn normalize_service_base(service_url: &str) -> String {
    let trimmed = service_url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/info.json")
        .unwrap_or(trimmed)
        .to_string()
}

/// IIIF Presentation API major version of a parsed manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IiifVersion {
    /// Presentation 2.x (`sequences` / `canvases`).
    V2,
    /// Presentation 3.x (`items`).
    V3,
}

/// Parsed manifest: ordered pages plus hints used by the flow controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    version: IiifVersion,
    label: Option<String>,
    pages: Vec<PageDescriptor>,
    native_pdf_url: Option<String>,
    raw: serde_json::Value,
}

impl Manifest {
    /// IIIF version detected while parsing.
    #[must_use]
    pub fn version(&self) -> IiifVersion {
        self.version
    }

    /// Flattened manifest label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Pages in manuscript order; indices are contiguous from 0.
    #[must_use]
    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    /// Native PDF rendering advertised by the manifest.
    #[must_use]
    pub fn native_pdf_url(&self) -> Option<&str> {
        self.native_pdf_url.as_deref()
    }

    /// The document as fetched, for archiving next to the page images.
    #[must_use]
    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_page_filename_is_one_based_and_padded() {
        assert_eq!(page_filename(0), "pag_0001.jpg");
        assert_eq!(page_filename(9), "pag_0010.jpg");
        assert_eq!(page_filename(1233), "pag_1234.jpg");
    }

    #[test]
    fn test_page_from_service_builds_full_size_url() {
        let page = PageDescriptor::from_service(2, "https://iiif.example.org/img/abc/");
        assert_eq!(page.index(), 2);
        assert_eq!(page.image_service_url(), Some("https://iiif.example.org/img/abc"));
        assert_eq!(
            page.fetch_url(),
            "https://iiif.example.org/img/abc/full/max/0/default.jpg"
        );
        assert_eq!(page.target_filename(), "pag_0003.jpg");
    }

    #[test]
    fn test_page_from_service_strips_info_json() {
        let page = PageDescriptor::from_service(0, "https://iiif.example.org/img/abc/info.json");
        assert_eq!(page.image_service_url(), Some("https://iiif.example.org/img/abc"));
    }

    #[test]
    fn test_page_from_resource_uses_url_verbatim() {
        let page = PageDescriptor::from_resource(0, "https://example.org/static/1.jpg");
        assert_eq!(page.image_service_url(), None);
        assert_eq!(page.fetch_url(), "https://example.org/static/1.jpg");
    }

    #[test]
    fn test_reference_label_falls_back_to_document_id() {
        let reference = CanonicalManifestReference::new(
            "vatican",
            "https://digi.vatlib.it/iiif/MSS_Urb.lat.1779/manifest.json",
            "MSS_Urb.lat.1779",
            Some("   ".to_string()),
            None,
        );
        assert_eq!(reference.display_label(), "MSS_Urb.lat.1779");
        assert_eq!(reference.native_pdf_url(), None);
    }
}
