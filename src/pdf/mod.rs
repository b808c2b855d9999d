//! Native-PDF page extraction and page-image PDF assembly.
//!
//! Both operations are CPU and disk bound and synchronous; async callers
//! run them through `tokio::task::spawn_blocking`.

mod extract;
mod generate;

use std::path::PathBuf;

use thiserror::Error;

pub use extract::extract_page_images;
pub use generate::generate_pdf_from_images;

/// Why a native PDF could not be turned into page images.
///
/// Always recoverable: the job falls back to tile download.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file is not a readable PDF.
    #[error("cannot open PDF '{path}': {reason}")]
    Open {
        /// PDF path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The PDF is encrypted.
    #[error("PDF '{path}' is encrypted")]
    Encrypted {
        /// PDF path.
        path: PathBuf,
    },

    /// Page count differs from the manifest's canvas count.
    #[error("PDF has {found} pages but the manifest lists {expected}")]
    PageCountMismatch {
        /// Canvases in the manifest.
        expected: usize,
        /// Pages in the PDF.
        found: usize,
    },

    /// A page carries no raster image this crate can extract.
    #[error("PDF page {page} has no extractable raster image")]
    MissingImage {
        /// 1-based PDF page number.
        page: u32,
    },

    /// A page image's pixel data could not be turned into a JPEG.
    #[error("PDF page {page} image does not decode: {reason}")]
    Decode {
        /// 1-based PDF page number.
        page: u32,
        /// Decoder message.
        reason: String,
    },

    /// Writing an extracted image failed.
    #[error("cannot write '{path}': {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Why a PDF could not be assembled from page images.
#[derive(Debug, Error)]
pub enum PdfBuildError {
    /// None of the given images could be used.
    #[error("no usable page images to assemble")]
    NoImages,

    /// PDF serialization failed.
    #[error("cannot build PDF: {reason}")]
    Pdf {
        /// lopdf message.
        reason: String,
    },

    /// Writing the PDF failed.
    #[error("cannot write '{path}': {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
