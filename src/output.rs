//! Output filesystem contract.
//!
//! One directory per manuscript under the downloads root:
//!
//! ```text
//! <downloads>/<SOURCE> - <document_id>/
//!     pages/pag_0001.jpg ...
//!     native.pdf | compiled.pdf      (optional)
//!     manifest.json                  raw IIIF manifest
//!     manifest_summary.json          what this run produced
//! ```
//!
//! The directory appears under its final name only once fully prepared:
//! it is built under a hidden temporary name and renamed into place.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::job::{JobStatus, Strategy};
use crate::manifest::CanonicalManifestReference;

/// Page-image subdirectory.
pub const PAGES_DIR: &str = "pages";
/// PDF downloaded from the library.
pub const NATIVE_PDF_FILE: &str = "native.pdf";
/// PDF assembled from page images.
pub const COMPILED_PDF_FILE: &str = "compiled.pdf";
/// Raw manifest as fetched.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Machine-readable run summary.
pub const SUMMARY_FILE: &str = "manifest_summary.json";
/// Scratch directory for pages extracted from a native PDF.
pub const STAGING_DIR: &str = ".extract-staging";

const FALLBACK_COMPONENT: &str = "untitled";

/// Errors writing the output directory.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Filesystem operation failed.
    #[error("cannot write '{path}': {source}\n  Suggestion: check that the downloads directory exists and is writable")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Summary or manifest could not be serialized.
    #[error("cannot serialize output record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl OutputError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Makes `value` safe as a single path component.
///
/// Reserved characters become `_`, control characters are dropped,
/// whitespace runs collapse to one space, and leading/trailing dots and
/// spaces are trimmed. An empty result becomes `untitled`.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_space = false;
    for ch in value.chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => {
                out.push('_');
                prev_space = false;
            }
            c if c.is_whitespace() => {
                if !prev_space {
                    out.push(' ');
                    prev_space = true;
                }
            }
            c if c.is_control() => {}
            c => {
                out.push(c);
                prev_space = false;
            }
        }
    }
    let trimmed = out.trim_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() {
        FALLBACK_COMPONENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Final directory name for a reference: `VATICAN - MSS_Urb.lat.1779`.
#[must_use]
pub fn directory_name(reference: &CanonicalManifestReference) -> String {
    format!(
        "{} - {}",
        sanitize_component(&reference.source_id().to_uppercase()),
        sanitize_component(reference.document_id())
    )
}

/// Everything a consumer needs to know about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestSummary {
    /// Canonical reference the job resolved to.
    pub reference: CanonicalManifestReference,
    /// Pages in the manifest.
    pub page_count: usize,
    /// Strategy chosen at planning time.
    pub strategy: Strategy,
    /// True if a native-PDF attempt fell back to tile download.
    pub fallback_to_tiles: bool,
    /// Terminal status.
    pub status: JobStatus,
    /// Pages on disk.
    pub completed_pages: usize,
    /// Pages that permanently failed.
    pub failed_pages: usize,
    /// 0-based indices of failed pages.
    pub failed_indices: Vec<usize>,
    /// Last error per failed page, in index order.
    pub page_errors: Vec<(usize, String)>,
    /// Why the native PDF could not be downloaded.
    pub native_pdf_error: Option<String>,
    /// Why pages could not be extracted from the native PDF.
    pub extraction_error: Option<String>,
    /// PDF produced by this run, if any.
    pub pdf_artifact: Option<PathBuf>,
    /// Cause of a fatal failure, if any.
    pub failure: Option<String>,
    /// When the job reached its terminal state.
    pub finished_at: DateTime<Utc>,
}

/// Paths inside one manuscript's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Layout rooted at an existing directory.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates (or reuses) the directory for `reference` under `downloads_dir`.
    ///
    /// A fresh directory is assembled under a hidden temporary name and
    /// renamed into place, so the final name never refers to a half-made
    /// directory. An existing directory is reused as-is to allow resume.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Io`] if the directories cannot be created.
    #[instrument(skip(reference), fields(downloads_dir = %downloads_dir.display()))]
    pub async fn prepare(
        downloads_dir: &Path,
        reference: &CanonicalManifestReference,
    ) -> Result<Self, OutputError> {
        tokio::fs::create_dir_all(downloads_dir)
            .await
            .map_err(|e| OutputError::io(downloads_dir, e))?;

        let name = directory_name(reference);
        let root = downloads_dir.join(&name);
        let layout = Self::at(&root);

        if is_dir(&root).await {
            debug!(root = %root.display(), "reusing existing output directory");
            layout.ensure_pages_dir().await?;
            return Ok(layout);
        }

        let temp = downloads_dir.join(format!(".{name}.tmp-{}", Uuid::new_v4().simple()));
        let temp_pages = temp.join(PAGES_DIR);
        tokio::fs::create_dir_all(&temp_pages)
            .await
            .map_err(|e| OutputError::io(&temp_pages, e))?;

        if let Err(e) = tokio::fs::rename(&temp, &root).await {
            let _ = tokio::fs::remove_dir_all(&temp).await;
            // Another job for the same manuscript may have won the race.
            if is_dir(&root).await {
                layout.ensure_pages_dir().await?;
                return Ok(layout);
            }
            return Err(OutputError::io(&root, e));
        }

        debug!(root = %root.display(), "created output directory");
        Ok(layout)
    }

    async fn ensure_pages_dir(&self) -> Result<(), OutputError> {
        let pages = self.pages_dir();
        tokio::fs::create_dir_all(&pages)
            .await
            .map_err(|e| OutputError::io(pages, e))
    }

    /// Directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Page-image directory.
    #[must_use]
    pub fn pages_dir(&self) -> PathBuf {
        self.root.join(PAGES_DIR)
    }

    /// Destination of a downloaded native PDF.
    #[must_use]
    pub fn native_pdf_path(&self) -> PathBuf {
        self.root.join(NATIVE_PDF_FILE)
    }

    /// Destination of a PDF assembled from page images.
    #[must_use]
    pub fn compiled_pdf_path(&self) -> PathBuf {
        self.root.join(COMPILED_PDF_FILE)
    }

    /// Raw manifest path.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Summary path.
    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    /// Extraction scratch directory.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Writes the raw manifest JSON.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] on serialization or IO failure.
    pub async fn write_manifest(&self, raw: &serde_json::Value) -> Result<PathBuf, OutputError> {
        let path = self.manifest_path();
        write_json_atomic(&path, raw).await?;
        Ok(path)
    }

    /// Writes `manifest_summary.json`.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] on serialization or IO failure.
    pub async fn write_summary(&self, summary: &ManifestSummary) -> Result<PathBuf, OutputError> {
        let path = self.summary_path();
        write_json_atomic(&path, summary).await?;
        Ok(path)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_dir())
}

async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), OutputError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| OutputError::io(&temp, e))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| OutputError::io(path, e))
}
