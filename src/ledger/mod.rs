//! Job Ledger: the narrow contract the engine reports progress through.
//!
//! The engine writes; observers (the CLI progress bar, an embedding UI)
//! poll [`JobLedger::read`] and only ever see a [`JobRecord`] snapshot.
//!
//! - [`InMemoryLedger`] - process-local, `DashMap` backed
//! - [`SqliteLedger`] - durable, backed by [`Database`](crate::Database)

mod memory;
mod sqlite;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::download::DownloadOutcome;
use crate::job::{AcquisitionJob, JobFailure, JobStatus, Strategy};

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

/// Ledger operation errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The job was never created in this ledger.
    #[error("unknown job {job_id}\n  Suggestion: create the job before recording progress for it")]
    UnknownJob {
        /// Missing job id.
        job_id: Uuid,
    },

    /// The backing store failed.
    #[error("ledger storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt ledger row for job {job_id}: {reason}")]
    Corrupt {
        /// Affected job.
        job_id: Uuid,
        /// What failed to decode.
        reason: String,
    },
}

/// Read-only projection of a job, safe to hand to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    /// Job id.
    pub job_id: Uuid,
    /// Input as supplied.
    pub raw_input: String,
    /// Latest published status.
    pub status: JobStatus,
    /// Strategy, once planned.
    pub strategy: Strategy,
    /// Resolver that produced the reference.
    pub source_id: Option<String>,
    /// Canonical document identifier.
    pub document_id: Option<String>,
    /// Human-readable title.
    pub display_label: Option<String>,
    /// Manifest URL.
    pub manifest_url: Option<String>,
    /// Per-manuscript output directory.
    pub output_dir: Option<PathBuf>,
    /// Pages in the plan.
    pub total_pages: usize,
    /// Pages on disk (fetched or resumed).
    pub completed_pages: usize,
    /// Pages that permanently failed.
    pub failed_pages: usize,
    /// Human-readable cause of a fatal failure.
    pub failure: Option<String>,
    /// Last error per failed page index.
    pub page_errors: BTreeMap<usize, String>,
    /// Last write to this record.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Fresh record mirroring a just-created job.
    #[must_use]
    pub fn from_job(job: &AcquisitionJob) -> Self {
        let mut record = Self {
            job_id: job.job_id(),
            raw_input: job.raw_input().to_string(),
            status: job.status(),
            strategy: Strategy::Unresolved,
            source_id: None,
            document_id: None,
            display_label: None,
            manifest_url: None,
            output_dir: None,
            total_pages: 0,
            completed_pages: 0,
            failed_pages: 0,
            failure: None,
            page_errors: BTreeMap::new(),
            updated_at: Utc::now(),
        };
        record.apply_plan(job);
        record
    }

    /// Pages recorded so far, successful or not.
    #[must_use]
    pub fn processed_pages(&self) -> usize {
        self.completed_pages + self.failed_pages
    }

    fn apply_plan(&mut self, job: &AcquisitionJob) {
        self.strategy = job.strategy();
        self.total_pages = job.pages().len();
        self.output_dir = job.output_dir().cloned();
        if let Some(reference) = job.reference() {
            self.source_id = Some(reference.source_id().to_string());
            self.document_id = Some(reference.document_id().to_string());
            self.display_label = Some(reference.display_label().to_string());
            self.manifest_url = Some(reference.manifest_url().to_string());
        }
        self.updated_at = Utc::now();
    }
}

/// Persistence contract for job progress.
///
/// Implementations must make `record_page_outcome` safe to call from many
/// workers of one job at once; counters only ever grow.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Registers a new job.
    async fn create(&self, job: &AcquisitionJob) -> Result<(), LedgerError>;

    /// Publishes a status change.
    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), LedgerError>;

    /// Publishes the resolved plan: reference, strategy, page count, output dir.
    async fn record_plan(&self, job: &AcquisitionJob) -> Result<(), LedgerError>;

    /// Folds one page outcome into the job's counters.
    async fn record_page_outcome(
        &self,
        job_id: Uuid,
        page_index: usize,
        outcome: &DownloadOutcome,
    ) -> Result<(), LedgerError>;

    /// Stores the human-readable cause of a fatal failure.
    async fn record_failure(&self, job_id: Uuid, failure: &JobFailure)
    -> Result<(), LedgerError>;

    /// Snapshot of the job, or `None` if it was never created.
    async fn read(&self, job_id: Uuid) -> Result<Option<JobRecord>, LedgerError>;
}
