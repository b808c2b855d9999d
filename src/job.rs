//! Acquisition job model.
//!
//! An [`AcquisitionJob`] is owned by the engine for its whole lifetime.
//! External observers never see it directly; they read the ledger's
//! [`JobRecord`](crate::ledger::JobRecord) snapshot.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::manifest::{CanonicalManifestReference, PageDescriptor};
use crate::resolver::ResolutionError;

/// Lifecycle status of a job, as published to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet started.
    Pending,
    /// Dispatching the input to a resolver.
    Resolving,
    /// Fetching page images or the native PDF.
    Downloading,
    /// Pulling page images out of a native PDF.
    Extracting,
    /// Assembling a PDF from downloaded page images.
    GeneratingPdf,
    /// Every page is on disk.
    Completed,
    /// Some pages failed, or optional PDF generation failed.
    PartiallyCompleted,
    /// No usable output.
    Failed,
}

impl JobStatus {
    /// Stable lowercase name used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::GeneratingPdf => "generating_pdf",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed => "failed",
        }
    }

    /// True for `Completed`, `PartiallyCompleted` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolving" => Ok(Self::Resolving),
            "downloading" => Ok(Self::Downloading),
            "extracting" => Ok(Self::Extracting),
            "generating_pdf" => Ok(Self::GeneratingPdf),
            "completed" => Ok(Self::Completed),
            "partially_completed" => Ok(Self::PartiallyCompleted),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Acquisition strategy, decided once before any fetch begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Download the library's PDF and extract pages from it.
    NativePdf,
    /// Download every page image through the IIIF image service.
    TileFallback,
    /// Resolution has not produced a plan (yet).
    Unresolved,
}

impl Strategy {
    /// Stable lowercase name used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NativePdf => "native_pdf",
            Self::TileFallback => "tile_fallback",
            Self::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native_pdf" => Ok(Self::NativePdf),
            "tile_fallback" => Ok(Self::TileFallback),
            "unresolved" => Ok(Self::Unresolved),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

/// Fatal, non-retriable job outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    /// The job's cancellation signal fired before a terminal state.
    #[error("cancelled before completion; pages already written are kept for resume")]
    Cancelled,

    /// Every page failed after retries.
    #[error("all {failed} pages failed to download")]
    AllPagesFailed {
        /// Number of failed pages.
        failed: usize,
    },

    /// The input could not be resolved to a manifest.
    #[error("resolution failed: {0}")]
    ResolutionFailed(#[from] ResolutionError),
}

/// Top-level unit of work.
#[derive(Debug, Clone)]
pub struct AcquisitionJob {
    job_id: Uuid,
    raw_input: String,
    reference: Option<CanonicalManifestReference>,
    pages: Vec<PageDescriptor>,
    strategy: Strategy,
    status: JobStatus,
    output_dir: Option<PathBuf>,
    created_at: DateTime<Utc>,
}

impl AcquisitionJob {
    /// Creates a `Pending` job for `raw_input` with a fresh id.
    #[must_use]
    pub fn new(raw_input: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            raw_input: raw_input.into(),
            reference: None,
            pages: Vec::new(),
            strategy: Strategy::Unresolved,
            status: JobStatus::Pending,
            output_dir: None,
            created_at: Utc::now(),
        }
    }

    /// Unique job id.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Input exactly as the caller supplied it.
    #[must_use]
    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    /// Canonical reference, once resolved.
    #[must_use]
    pub fn reference(&self) -> Option<&CanonicalManifestReference> {
        self.reference.as_ref()
    }

    /// Ordered pages, once resolved.
    #[must_use]
    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    /// Chosen strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Per-manuscript output directory, once created.
    #[must_use]
    pub fn output_dir(&self) -> Option<&PathBuf> {
        self.output_dir.as_ref()
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Fixes the plan. Only the first call has any effect: the strategy is
    /// never revisited mid-job.
    pub fn plan(
        &mut self,
        reference: CanonicalManifestReference,
        pages: Vec<PageDescriptor>,
        strategy: Strategy,
        output_dir: PathBuf,
    ) {
        if self.strategy != Strategy::Unresolved {
            debug!(job_id = %self.job_id, "plan already fixed; ignoring");
            return;
        }
        self.reference = Some(reference);
        self.pages = pages;
        self.strategy = strategy;
        self.output_dir = Some(output_dir);
    }

    /// Moves the job to `status`. Terminal states are absorbing.
    pub fn set_status(&mut self, status: JobStatus) {
        if self.status.is_terminal() {
            debug!(
                job_id = %self.job_id,
                from = %self.status,
                to = %status,
                "job already terminal"
            );
            return;
        }
        debug!(job_id = %self.job_id, from = %self.status, to = %status, "job status change");
        self.status = status;
    }
}
