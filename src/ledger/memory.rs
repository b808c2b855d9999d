use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{JobLedger, JobRecord, LedgerError};
use crate::download::DownloadOutcome;
use crate::job::{AcquisitionJob, JobFailure, JobStatus};

/// Process-local ledger.
///
/// Each job lives in one `DashMap` entry; mutating through `get_mut` holds
/// that entry's shard lock, so concurrent page outcomes never lose an
/// increment.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    jobs: DashMap<Uuid, JobRecord>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True if no job was ever created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn with_record<F>(&self, job_id: Uuid, update: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut entry = self
            .jobs
            .get_mut(&job_id)
            .ok_or(LedgerError::UnknownJob { job_id })?;
        update(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobLedger for InMemoryLedger {
    async fn create(&self, job: &AcquisitionJob) -> Result<(), LedgerError> {
        debug!(job_id = %job.job_id(), "ledger create");
        self.jobs.insert(job.job_id(), JobRecord::from_job(job));
        Ok(())
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), LedgerError> {
        self.with_record(job_id, |record| record.status = status)
    }

    async fn record_plan(&self, job: &AcquisitionJob) -> Result<(), LedgerError> {
        self.with_record(job.job_id(), |record| record.apply_plan(job))
    }

    async fn record_page_outcome(
        &self,
        job_id: Uuid,
        page_index: usize,
        outcome: &DownloadOutcome,
    ) -> Result<(), LedgerError> {
        self.with_record(job_id, |record| {
            if outcome.is_success() {
                record.completed_pages += 1;
                record.page_errors.remove(&page_index);
            } else {
                record.failed_pages += 1;
                if let Some(error) = &outcome.last_error {
                    record.page_errors.insert(page_index, error.clone());
                }
            }
        })
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        failure: &JobFailure,
    ) -> Result<(), LedgerError> {
        self.with_record(job_id, |record| record.failure = Some(failure.to_string()))
    }

    async fn read(&self, job_id: Uuid) -> Result<Option<JobRecord>, LedgerError> {
        Ok(self.jobs.get(&job_id).map(|entry| entry.value().clone()))
    }
}
