//! Concurrent Download Executor.
//!
//! Fetches either every page of a manifest or a single native PDF through
//! the shared [`Transport`], with bounded concurrency, per-item retry,
//! a job-wide cooldown after `Blocking` failures, and resume from files
//! already on disk.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use acquire_core::download::{DownloadExecutor, DownloadTarget, ExecutionContext};
//! use acquire_core::ledger::InMemoryLedger;
//! use acquire_core::transport::{RetryPolicy, Transport, TransportSettings};
//! use tokio_util::sync::CancellationToken;
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = DownloadExecutor::new(4, RetryPolicy::default(), Duration::from_secs(15))?;
//! let ctx = ExecutionContext {
//!     job_id: Uuid::new_v4(),
//!     transport: Transport::new(&TransportSettings::default())?,
//!     ledger: Arc::new(InMemoryLedger::new()),
//!     cancel: CancellationToken::new(),
//! };
//! let target = DownloadTarget::NativePdf {
//!     url: "https://example.org/book.pdf".to_string(),
//!     dest: "book.pdf".into(),
//! };
//! let summary = executor.execute(&ctx, target).await?;
//! println!("completed: {}, failed: {}", summary.completed(), summary.failed());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::cooldown::CooldownGate;
use super::outcome::{DownloadOutcome, DownloadSummary};
use crate::ledger::JobLedger;
use crate::manifest::PageDescriptor;
use crate::transport::{
    FailureType, PayloadKind, RetryDecision, RetryPolicy, Transport, classify_error,
};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 64;

/// Default concurrency if not configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Files at least this large are treated as already downloaded.
///
/// Smaller files are usually error pages or truncated writes from an
/// older run and are fetched again.
pub const RESUME_MIN_BYTES: u64 = 1024;

/// Error type for executor setup. Per-item failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The destination directory could not be prepared.
    #[error("cannot prepare download directory '{path}': {source}")]
    OutputDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// What to fetch.
#[derive(Debug, Clone)]
pub enum DownloadTarget {
    /// Every page, each written to `image_dir/<target_filename>`.
    Pages {
        /// Ordered page descriptors.
        pages: Vec<PageDescriptor>,
        /// Page-image directory.
        image_dir: PathBuf,
    },
    /// The library's own PDF, as a single item.
    NativePdf {
        /// PDF URL.
        url: String,
        /// Destination file.
        dest: PathBuf,
    },
}

/// Per-job collaborators handed to [`DownloadExecutor::execute`].
#[derive(Clone)]
pub struct ExecutionContext {
    /// Job the outcomes belong to.
    pub job_id: Uuid,
    /// Shared transport.
    pub transport: Transport,
    /// Progress sink.
    pub ledger: Arc<dyn JobLedger>,
    /// Job-scoped cancellation signal.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("job_id", &self.job_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct WorkItem {
    index: usize,
    url: String,
    dest: PathBuf,
    kind: PayloadKind,
}

/// State shared by every task of one `execute` call.
struct Run {
    ctx: ExecutionContext,
    policy: RetryPolicy,
    blocking_cooldown: Duration,
    gate: CooldownGate,
    retried: AtomicUsize,
    record_pages: bool,
}

/// Bounded pool of download tasks.
#[derive(Debug, Clone)]
pub struct DownloadExecutor {
    concurrency: usize,
    retry_policy: RetryPolicy,
    blocking_cooldown: Duration,
}

impl DownloadExecutor {
    /// Creates an executor.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidConcurrency`] if `concurrency` is
    /// outside 1..=64.
    #[instrument(level = "debug", skip(retry_policy))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        blocking_cooldown: Duration,
    ) -> Result<Self, ExecutorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(ExecutorError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            cooldown_ms = blocking_cooldown.as_millis(),
            "creating download executor"
        );

        Ok(Self {
            concurrency,
            retry_policy,
            blocking_cooldown,
        })
    }

    /// Configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Fetches `target`, returning once every item is settled or the job
    /// is cancelled.
    ///
    /// Page outcomes are reported to the ledger as they land; a native-PDF
    /// target is not counted against the job's pages.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::OutputDir`] if the page directory cannot be
    /// created. Individual item failures are reported in the summary.
    #[instrument(skip(self, ctx, target), fields(job_id = %ctx.job_id))]
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        target: DownloadTarget,
    ) -> Result<DownloadSummary, ExecutorError> {
        let (mut items, record_pages) = match target {
            DownloadTarget::Pages { pages, image_dir } => {
                tokio::fs::create_dir_all(&image_dir).await.map_err(|source| {
                    ExecutorError::OutputDir {
                        path: image_dir.clone(),
                        source,
                    }
                })?;
                let items = pages
                    .iter()
                    .map(|page| WorkItem {
                        index: page.index(),
                        url: page.fetch_url().to_string(),
                        dest: image_dir.join(page.target_filename()),
                        kind: PayloadKind::Image,
                    })
                    .collect::<Vec<_>>();
                (items, true)
            }
            DownloadTarget::NativePdf { url, dest } => (
                vec![WorkItem {
                    index: 0,
                    url,
                    dest,
                    kind: PayloadKind::Pdf,
                }],
                false,
            ),
        };
        let total = items.len();
        // Pop from the back, so reverse to dequeue in page order.
        items.reverse();

        let run = Arc::new(Run {
            ctx: ctx.clone(),
            policy: self.retry_policy.clone(),
            blocking_cooldown: self.blocking_cooldown,
            gate: CooldownGate::new(),
            retried: AtomicUsize::new(0),
            record_pages,
        });
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);

        info!(total, concurrency = self.concurrency, "starting downloads");

        while let Some(item) = items.pop() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| ExecutorError::SemaphoreClosed)?;

            run.gate.wait(&run.ctx.cancel).await;
            if run.ctx.cancel.is_cancelled() {
                info!(
                    remaining = items.len() + 1,
                    "cancelled; not starting remaining items"
                );
                break;
            }

            let run = Arc::clone(&run);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = fetch_with_retry(&run, &item).await;
                run.record(&outcome).await;
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "download task panicked"),
            }
        }
        outcomes.sort_by_key(|o| o.index);

        let summary = DownloadSummary {
            total,
            outcomes,
            retried: run.retried.load(Ordering::SeqCst),
            cooldowns: run.gate.trigger_count(),
            cancelled: ctx.cancel.is_cancelled(),
        };
        info!(
            completed = summary.completed(),
            failed = summary.failed(),
            resumed = summary.resumed(),
            retried = summary.retried,
            cooldowns = summary.cooldowns,
            cancelled = summary.cancelled,
            "downloads finished"
        );
        Ok(summary)
    }
}

impl Run {
    async fn record(&self, outcome: &DownloadOutcome) {
        if !self.record_pages {
            return;
        }
        // Progress reporting never fails a page.
        if let Err(e) = self
            .ctx
            .ledger
            .record_page_outcome(self.ctx.job_id, outcome.index, outcome)
            .await
        {
            warn!(index = outcome.index, error = %e, "failed to record page outcome");
        }
    }
}

/// Size of an existing regular file at `path`, if any.
async fn existing_size(path: &std::path::Path) -> Option<u64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.is_file().then_some(metadata.len())
}

#[instrument(skip(run, item), fields(index = item.index, url = %item.url))]
async fn fetch_with_retry(run: &Run, item: &WorkItem) -> DownloadOutcome {
    if let Some(size) = existing_size(&item.dest).await {
        if size >= RESUME_MIN_BYTES {
            debug!(size, "already on disk; skipping");
            return DownloadOutcome::resumed(item.index, size);
        }
        debug!(size, "undersized file on disk; refetching");
    }

    let cancel = &run.ctx.cancel;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(attempt, "attempting download");

        let error = match run
            .ctx
            .transport
            .fetch_to_file(&item.url, &item.dest, item.kind)
            .await
        {
            Ok(bytes) => return DownloadOutcome::succeeded(item.index, attempt, bytes),
            Err(e) => e,
        };

        let failure_type = classify_error(&error);
        let retry_after = error.retry_after();
        if failure_type == FailureType::Blocking {
            run.gate
                .trigger(run.blocking_cooldown.max(retry_after.unwrap_or_default()));
        }

        match run.policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay: backoff_delay,
                attempt: next_attempt,
            } => {
                let delay = backoff_delay.max(retry_after.unwrap_or_default());
                info!(
                    attempt = next_attempt,
                    max_attempts = run.policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    ?failure_type,
                    error = %error,
                    "retrying download"
                );
                run.retried.fetch_add(1, Ordering::SeqCst);

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {}
                }
                run.gate.wait(cancel).await;
                if cancel.is_cancelled() {
                    return DownloadOutcome::failed(
                        item.index,
                        attempt,
                        format!("cancelled before retry; last error: {error}"),
                    );
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(attempt, %reason, error = %error, "giving up on item");
                return DownloadOutcome::failed(item.index, attempt, error.to_string());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_new_valid_concurrency() {
        for value in [1, DEFAULT_CONCURRENCY, 64] {
            let executor =
                DownloadExecutor::new(value, RetryPolicy::default(), Duration::ZERO).unwrap();
            assert_eq!(executor.concurrency(), value);
        }
    }

    #[test]
    fn test_executor_new_invalid_concurrency() {
        for value in [0, 65] {
            let result = DownloadExecutor::new(value, RetryPolicy::default(), Duration::ZERO);
            assert!(matches!(
                result,
                Err(ExecutorError::InvalidConcurrency { value: v }) if v == value
            ));
        }
    }

    #[test]
    fn test_executor_stores_retry_policy() {
        let executor =
            DownloadExecutor::new(2, RetryPolicy::with_max_attempts(5), Duration::ZERO).unwrap();
        assert_eq!(executor.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn test_executor_error_display() {
        let msg = ExecutorError::InvalidConcurrency { value: 0 }.to_string();
        assert!(msg.contains("invalid concurrency"));
        assert!(msg.contains("64"));
    }

    #[tokio::test]
    async fn test_existing_size_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(existing_size(dir.path()).await, None);
        let file = dir.path().join("pag_0001.jpg");
        std::fs::write(&file, [0u8; 10]).unwrap();
        assert_eq!(existing_size(&file).await, Some(10));
    }
}
