use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::download::DownloadSummary;
use crate::job::{AcquisitionJob, JobFailure, JobStatus, Strategy};
use crate::manifest::CanonicalManifestReference;
use crate::output::ManifestSummary;

/// What one job produced.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Job id.
    pub job_id: Uuid,
    /// Terminal status.
    pub status: JobStatus,
    /// Cause when `status` is `Failed`.
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<JobFailure>,
    /// Resolved reference, absent when resolution failed.
    pub reference: Option<CanonicalManifestReference>,
    /// Strategy chosen at planning time.
    pub strategy: Strategy,
    /// A native-PDF attempt fell back to tile download.
    pub fallback_to_tiles: bool,
    /// Per-manuscript output directory.
    pub output_dir: Option<PathBuf>,
    /// Pages in the manifest.
    pub total_pages: usize,
    /// Pages on disk.
    pub completed_pages: usize,
    /// Pages not on disk.
    pub failed_pages: usize,
    /// 0-based indices of pages not on disk.
    pub failed_indices: Vec<usize>,
    /// Last error per failed page, in index order.
    pub page_errors: Vec<(usize, String)>,
    /// Last error of the native-PDF download, when it failed.
    pub native_pdf_error: Option<String>,
    /// Why the downloaded native PDF could not be split into pages.
    pub extraction_error: Option<String>,
    /// Native or compiled PDF produced by this job.
    pub pdf_artifact: Option<PathBuf>,
}

#[allow(clippy::ref_option)]
fn serialize_failure<S>(failure: &Option<JobFailure>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match failure {
        Some(failure) => serializer.serialize_some(&failure.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Mutable facts gathered while the flow runs.
#[derive(Debug, Default)]
pub(super) struct RunFacts {
    pub(super) fallback_to_tiles: bool,
    pub(super) pages_extracted: bool,
    pub(super) tiles: Option<DownloadSummary>,
    pub(super) pdf_artifact: Option<PathBuf>,
    pub(super) native_pdf_error: Option<String>,
    pub(super) extraction_error: Option<String>,
}

impl JobReport {
    pub(super) fn build(
        job: &AcquisitionJob,
        failure: Option<JobFailure>,
        facts: &RunFacts,
    ) -> Self {
        let total_pages = job.pages().len();
        let mut page_errors = Vec::new();

        let succeeded: BTreeSet<usize> = if facts.pages_extracted {
            (0..total_pages).collect()
        } else if let Some(tiles) = &facts.tiles {
            for outcome in tiles.failures() {
                if let Some(error) = &outcome.last_error {
                    page_errors.push((outcome.index, error.clone()));
                }
            }
            tiles
                .outcomes
                .iter()
                .filter(|o| o.is_success())
                .map(|o| o.index)
                .collect()
        } else {
            BTreeSet::new()
        };

        let failed_indices: Vec<usize> = (0..total_pages)
            .filter(|index| !succeeded.contains(index))
            .collect();

        Self {
            job_id: job.job_id(),
            status: job.status(),
            failure,
            reference: job.reference().cloned(),
            strategy: job.strategy(),
            fallback_to_tiles: facts.fallback_to_tiles,
            output_dir: job.output_dir().cloned(),
            total_pages,
            completed_pages: succeeded.len(),
            failed_pages: failed_indices.len(),
            failed_indices,
            page_errors,
            native_pdf_error: facts.native_pdf_error.clone(),
            extraction_error: facts.extraction_error.clone(),
            pdf_artifact: facts.pdf_artifact.clone(),
        }
    }

    /// `manifest_summary.json` content, when the job got as far as planning.
    #[must_use]
    pub fn manifest_summary(&self) -> Option<ManifestSummary> {
        Some(ManifestSummary {
            reference: self.reference.clone()?,
            page_count: self.total_pages,
            strategy: self.strategy,
            fallback_to_tiles: self.fallback_to_tiles,
            status: self.status,
            completed_pages: self.completed_pages,
            failed_pages: self.failed_pages,
            failed_indices: self.failed_indices.clone(),
            page_errors: self.page_errors.clone(),
            native_pdf_error: self.native_pdf_error.clone(),
            extraction_error: self.extraction_error.clone(),
            pdf_artifact: self.pdf_artifact.clone(),
            failure: self.failure.as_ref().map(ToString::to_string),
            finished_at: Utc::now(),
        })
    }
}
