use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;
use uuid::Uuid;

use super::{JobLedger, JobRecord, LedgerError};
use crate::db::Database;
use crate::download::DownloadOutcome;
use crate::job::{AcquisitionJob, JobFailure, JobStatus, Strategy};

/// Durable ledger on the `acquisition_jobs` / `page_outcomes` tables.
///
/// Counters are bumped with `SET n = n + 1` so concurrent workers never
/// read-modify-write in Rust.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    db: Database,
}

fn check_affected(job_id: Uuid, rows_affected: u64) -> Result<(), LedgerError> {
    if rows_affected == 0 {
        Err(LedgerError::UnknownJob { job_id })
    } else {
        Ok(())
    }
}

#[allow(clippy::cast_possible_wrap)]
fn to_db_index(value: usize) -> i64 {
    value as i64
}

fn from_db_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

impl SqliteLedger {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn decode(job_id: Uuid, row: &SqliteRow) -> Result<JobRecord, LedgerError> {
        let corrupt = |reason: String| LedgerError::Corrupt { job_id, reason };

        let status: String = row.try_get("status")?;
        let strategy: String = row.try_get("strategy")?;
        let updated_at: String = row.try_get("updated_at")?;
        let output_dir: Option<String> = row.try_get("output_dir")?;

        Ok(JobRecord {
            job_id,
            raw_input: row.try_get("raw_input")?,
            status: status.parse::<JobStatus>().map_err(corrupt)?,
            strategy: strategy.parse::<Strategy>().map_err(corrupt)?,
            source_id: row.try_get("source_id")?,
            document_id: row.try_get("document_id")?,
            display_label: row.try_get("display_label")?,
            manifest_url: row.try_get("manifest_url")?,
            output_dir: output_dir.map(PathBuf::from),
            total_pages: from_db_count(row.try_get("total_pages")?),
            completed_pages: from_db_count(row.try_get("completed_pages")?),
            failed_pages: from_db_count(row.try_get("failed_pages")?),
            failure: row.try_get("failure")?,
            page_errors: BTreeMap::new(),
            updated_at: parse_sqlite_timestamp(&updated_at).unwrap_or_else(Utc::now),
        })
    }
}

/// `datetime('now')` yields `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_sqlite_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl JobLedger for SqliteLedger {
    #[instrument(skip(self, job), fields(job_id = %job.job_id()))]
    async fn create(&self, job: &AcquisitionJob) -> Result<(), LedgerError> {
        sqlx::query(
            r"INSERT INTO acquisition_jobs (job_id, raw_input, status, strategy, created_at)
              VALUES (?, ?, ?, ?, ?)",
        )
        .bind(job.job_id().to_string())
        .bind(job.raw_input())
        .bind(job.status().as_str())
        .bind(job.strategy().as_str())
        .bind(job.created_at().format("%Y-%m-%d %H:%M:%S").to_string())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r"UPDATE acquisition_jobs
              SET status = ?, updated_at = datetime('now')
              WHERE job_id = ?",
        )
        .bind(status.as_str())
        .bind(job_id.to_string())
        .execute(self.db.pool())
        .await?;
        check_affected(job_id, result.rows_affected())
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id()))]
    async fn record_plan(&self, job: &AcquisitionJob) -> Result<(), LedgerError> {
        let reference = job.reference();
        let result = sqlx::query(
            r"UPDATE acquisition_jobs
              SET strategy = ?,
                  source_id = ?,
                  document_id = ?,
                  display_label = ?,
                  manifest_url = ?,
                  output_dir = ?,
                  total_pages = ?,
                  updated_at = datetime('now')
              WHERE job_id = ?",
        )
        .bind(job.strategy().as_str())
        .bind(reference.map(|r| r.source_id().to_string()))
        .bind(reference.map(|r| r.document_id().to_string()))
        .bind(reference.map(|r| r.display_label().to_string()))
        .bind(reference.map(|r| r.manifest_url().to_string()))
        .bind(job.output_dir().map(|p| p.display().to_string()))
        .bind(to_db_index(job.pages().len()))
        .bind(job.job_id().to_string())
        .execute(self.db.pool())
        .await?;
        check_affected(job.job_id(), result.rows_affected())
    }

    async fn record_page_outcome(
        &self,
        job_id: Uuid,
        page_index: usize,
        outcome: &DownloadOutcome,
    ) -> Result<(), LedgerError> {
        let counter = if outcome.is_success() {
            r"UPDATE acquisition_jobs
              SET completed_pages = completed_pages + 1, updated_at = datetime('now')
              WHERE job_id = ?"
        } else {
            r"UPDATE acquisition_jobs
              SET failed_pages = failed_pages + 1, updated_at = datetime('now')
              WHERE job_id = ?"
        };

        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(counter)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;
        check_affected(job_id, result.rows_affected())?;

        sqlx::query(
            r"INSERT INTO page_outcomes
                (job_id, page_index, attempt_count, last_error, completed_at, bytes_written, resumed)
              VALUES (?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (job_id, page_index) DO UPDATE SET
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                completed_at = excluded.completed_at,
                bytes_written = excluded.bytes_written,
                resumed = excluded.resumed",
        )
        .bind(job_id.to_string())
        .bind(to_db_index(page_index))
        .bind(i64::from(outcome.attempt_count))
        .bind(outcome.last_error.as_deref())
        .bind(outcome.completed_at.map(|t| t.to_rfc3339()))
        .bind(i64::try_from(outcome.bytes_written).unwrap_or(i64::MAX))
        .bind(outcome.resumed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        failure: &JobFailure,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r"UPDATE acquisition_jobs
              SET failure = ?, updated_at = datetime('now')
              WHERE job_id = ?",
        )
        .bind(failure.to_string())
        .bind(job_id.to_string())
        .execute(self.db.pool())
        .await?;
        check_affected(job_id, result.rows_affected())
    }

    async fn read(&self, job_id: Uuid) -> Result<Option<JobRecord>, LedgerError> {
        let Some(row) = sqlx::query("SELECT * FROM acquisition_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(self.db.pool())
            .await?
        else {
            return Ok(None);
        };
        let mut record = Self::decode(job_id, &row)?;

        let failed_pages = sqlx::query(
            r"SELECT page_index, last_error FROM page_outcomes
              WHERE job_id = ? AND completed_at IS NULL AND last_error IS NOT NULL
              ORDER BY page_index",
        )
        .bind(job_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        for row in failed_pages {
            let index: i64 = row.try_get("page_index")?;
            let error: String = row.try_get("last_error")?;
            record.page_errors.insert(from_db_count(index), error);
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn ledger() -> SqliteLedger {
        SqliteLedger::new(Database::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_sqlite_create_and_read() {
        let ledger = ledger().await;
        let job = AcquisitionJob::new("btv1b8451636f");
        ledger.create(&job).await.unwrap();

        let record = ledger.read(job.job_id()).await.unwrap().unwrap();
        assert_eq!(record.raw_input, "btv1b8451636f");
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.strategy, Strategy::Unresolved);
        assert_eq!(record.total_pages, 0);
    }

    #[tokio::test]
    async fn test_sqlite_unknown_job() {
        let ledger = ledger().await;
        let id = Uuid::new_v4();
        assert!(ledger.read(id).await.unwrap().is_none());
        let err = ledger
            .update_status(id, JobStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownJob { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_page_outcomes_count_and_upsert() {
        let ledger = ledger().await;
        let job = AcquisitionJob::new("x");
        ledger.create(&job).await.unwrap();
        let id = job.job_id();

        ledger
            .record_page_outcome(id, 0, &DownloadOutcome::succeeded(0, 1, 4096))
            .await
            .unwrap();
        ledger
            .record_page_outcome(id, 1, &DownloadOutcome::failed(1, 3, "HTTP 500"))
            .await
            .unwrap();
        ledger
            .record_page_outcome(id, 2, &DownloadOutcome::resumed(2, 4096))
            .await
            .unwrap();

        let record = ledger.read(id).await.unwrap().unwrap();
        assert_eq!(record.completed_pages, 2);
        assert_eq!(record.failed_pages, 1);
        assert_eq!(record.page_errors.get(&1).map(String::as_str), Some("HTTP 500"));

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM page_outcomes")
            .fetch_one(ledger.db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[tokio::test]
    async fn test_sqlite_status_and_failure() {
        let ledger = ledger().await;
        let job = AcquisitionJob::new("x");
        ledger.create(&job).await.unwrap();
        ledger
            .update_status(job.job_id(), JobStatus::Failed)
            .await
            .unwrap();
        ledger
            .record_failure(job.job_id(), &JobFailure::Cancelled)
            .await
            .unwrap();

        let record = ledger.read(job.job_id()).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.failure.unwrap().starts_with("cancelled"));
    }
}
