//! Acquisition engine: dispatch, plan, run the Golden Flow, report.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use acquire_core::{AcquisitionEngine, EngineConfig, InMemoryLedger};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = AcquisitionEngine::new(EngineConfig::default(), Arc::new(InMemoryLedger::new()))?;
//! let report = engine.acquire("Urb. lat. 1779", CancellationToken::new()).await?;
//! println!("{}: {}/{} pages", report.status, report.completed_pages, report.total_pages);
//! # Ok(())
//! # }
//! ```

mod report;
mod steps;

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::download::{DownloadExecutor, ExecutionContext, ExecutorError};
use crate::flow::{FlowError, FlowEvent, FlowSettings, FlowState, transition};
use crate::job::{AcquisitionJob, JobFailure, JobStatus, Strategy};
use crate::ledger::{JobLedger, LedgerError};
use crate::output::{OutputError, OutputLayout};
use crate::resolver::{
    ResolveContext, ResolvedManifest, ResolverRegistry, build_default_registry,
};
use crate::transport::{Transport, TransportError};

use report::RunFacts;
pub use report::JobReport;

/// Errors that stop a job without a normal terminal report.
///
/// Resolution failures, page failures and cancellation are not errors here:
/// they end the job with a terminal status inside a [`JobReport`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("cannot initialize transport: {0}")]
    Transport(#[from] TransportError),

    /// Executor setup failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The output directory could not be prepared.
    #[error(transparent)]
    Output(#[from] OutputError),

    /// The job could not be registered with the ledger.
    #[error("cannot register job: {0}")]
    Ledger(#[from] LedgerError),

    /// The flow controller rejected an event.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// The job task panicked or was aborted.
    #[error("acquisition task failed: {reason}")]
    Task {
        /// Join error text.
        reason: String,
    },
}

/// Runs acquisition jobs against a shared transport and ledger.
///
/// Cloning is cheap; clones share the transport, registry and ledger.
#[derive(Clone)]
pub struct AcquisitionEngine {
    config: EngineConfig,
    ledger: Arc<dyn JobLedger>,
    transport: Transport,
    registry: Arc<ResolverRegistry>,
    executor: DownloadExecutor,
}

impl std::fmt::Debug for AcquisitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// A job running on the tokio runtime.
#[derive(Debug)]
pub struct AcquisitionHandle {
    job_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<Result<JobReport, EngineError>>,
}

impl AcquisitionHandle {
    /// Job id, usable with [`JobLedger::read`] right away.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Requests cancellation. Pages already written are kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The job's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once the job task has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the job to finish.
    ///
    /// # Errors
    ///
    /// Returns the job's [`EngineError`], or [`EngineError::Task`] if the
    /// task panicked.
    pub async fn wait(self) -> Result<JobReport, EngineError> {
        self.join.await.map_err(|e| EngineError::Task {
            reason: e.to_string(),
        })?
    }
}

impl AcquisitionEngine {
    /// Builds an engine with the default resolver set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if `config` is invalid or the transport
    /// cannot be built.
    pub fn new(config: EngineConfig, ledger: Arc<dyn JobLedger>) -> Result<Self, EngineError> {
        config.validate()?;
        let transport = Transport::new(&config.transport_settings())?;
        let executor = DownloadExecutor::new(
            config.download_workers,
            config.retry_policy(),
            config.blocking_cooldown(),
        )?;
        debug!(workers = config.download_workers, "acquisition engine ready");
        Ok(Self {
            config,
            ledger,
            transport,
            registry: Arc::new(build_default_registry()),
            executor,
        })
    }

    /// Replaces the resolver set.
    #[must_use]
    pub fn with_registry(mut self, registry: ResolverRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolver set used for dispatch.
    #[must_use]
    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Runs one job to a terminal state.
    ///
    /// # Errors
    ///
    /// See [`EngineError`]; everything else ends up in the report.
    pub async fn acquire(
        &self,
        raw_input: &str,
        cancel: CancellationToken,
    ) -> Result<JobReport, EngineError> {
        self.run_job(AcquisitionJob::new(raw_input), cancel).await
    }

    /// Starts a job in the background.
    #[must_use]
    pub fn spawn(&self, raw_input: impl Into<String>) -> AcquisitionHandle {
        let job = AcquisitionJob::new(raw_input);
        let job_id = job.job_id();
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { engine.run_job(job, token).await });
        AcquisitionHandle {
            job_id,
            cancel,
            join,
        }
    }

    #[instrument(skip(self, job, cancel), fields(job_id = %job.job_id(), input = %job.raw_input()))]
    async fn run_job(
        &self,
        mut job: AcquisitionJob,
        cancel: CancellationToken,
    ) -> Result<JobReport, EngineError> {
        self.ledger.create(&job).await?;

        if cancel.is_cancelled() {
            return Ok(self.fail_early(&mut job, JobFailure::Cancelled).await);
        }

        self.publish(&mut job, JobStatus::Resolving).await;
        let resolve_ctx = ResolveContext::new(self.transport.clone(), self.config.retry_policy());
        let resolved = tokio::select! {
            result = self.registry.dispatch(job.raw_input(), &resolve_ctx) => result,
            () = cancel.cancelled() => {
                return Ok(self.fail_early(&mut job, JobFailure::Cancelled).await);
            }
        };
        let ResolvedManifest {
            reference,
            manifest,
        } = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "resolution failed");
                let failure = JobFailure::ResolutionFailed(e);
                return Ok(self.fail_early(&mut job, failure).await);
            }
        };

        let settings = FlowSettings {
            has_native_pdf: reference.native_pdf_url().is_some(),
            prefer_images: self.config.prefer_images,
            auto_generate_pdf: self.config.auto_generate_pdf,
        };
        let strategy = if settings.has_native_pdf && !settings.prefer_images {
            Strategy::NativePdf
        } else {
            Strategy::TileFallback
        };

        let layout = match OutputLayout::prepare(&self.config.downloads_dir, &reference).await {
            Ok(layout) => layout,
            Err(e) => {
                self.publish(&mut job, JobStatus::Failed).await;
                return Err(e.into());
            }
        };

        info!(
            source = reference.source_id(),
            document_id = reference.document_id(),
            pages = manifest.pages().len(),
            %strategy,
            output_dir = %layout.root().display(),
            "plan fixed"
        );
        let pdf_url = reference.native_pdf_url().map(ToString::to_string);
        job.plan(
            reference,
            manifest.pages().to_vec(),
            strategy,
            layout.root().to_path_buf(),
        );
        if let Err(e) = self.ledger.record_plan(&job).await {
            warn!(error = %e, "failed to record plan");
        }
        if let Err(e) = layout.write_manifest(manifest.raw()).await {
            warn!(error = %e, "failed to write manifest.json");
        }

        let exec_ctx = ExecutionContext {
            job_id: job.job_id(),
            transport: self.transport.clone(),
            ledger: Arc::clone(&self.ledger),
            cancel: cancel.clone(),
        };
        let mut facts = RunFacts::default();
        let mut state = transition(&FlowState::Resolved, FlowEvent::Start, &settings)?;

        while !state.is_terminal() {
            debug!(state = state.name(), "entering flow state");
            self.publish(&mut job, state.job_status()).await;

            let event = if cancel.is_cancelled() {
                FlowEvent::Cancelled
            } else {
                match &state {
                    FlowState::NativePdfAttempt => match pdf_url.as_deref() {
                        Some(url) => {
                            self.step_native_pdf(&exec_ctx, url, &layout, &mut facts)
                                .await?
                        }
                        None => FlowEvent::PdfUnavailable,
                    },
                    FlowState::Extraction => {
                        self.step_extract(&exec_ctx, &job, &layout, &mut facts)
                            .await
                    }
                    FlowState::TileDownload => {
                        self.step_tiles(&exec_ctx, &job, &layout, &mut facts)
                            .await?
                    }
                    FlowState::AutoPdfGeneration { .. } => {
                        self.step_generate_pdf(&job, &layout, &mut facts).await
                    }
                    FlowState::Resolved => FlowEvent::Start,
                    FlowState::Completed
                    | FlowState::PartiallyCompleted
                    | FlowState::Failed(_) => break,
                }
            };

            let next = transition(&state, event.clone(), &settings)?;
            debug!(from = state.name(), to = next.name(), ?event, "flow transition");
            state = next;
        }

        let failure = match &state {
            FlowState::Failed(failure) => Some(failure.clone()),
            _ => None,
        };
        Ok(self
            .finish(&mut job, state.job_status(), failure, &facts, Some(&layout))
            .await)
    }

    /// Ends a job that never got an output directory.
    async fn fail_early(&self, job: &mut AcquisitionJob, failure: JobFailure) -> JobReport {
        self.finish(job, JobStatus::Failed, Some(failure), &RunFacts::default(), None)
            .await
    }

    /// Publishes the terminal status, records the failure, writes the
    /// summary and builds the report.
    async fn finish(
        &self,
        job: &mut AcquisitionJob,
        status: JobStatus,
        failure: Option<JobFailure>,
        facts: &RunFacts,
        layout: Option<&OutputLayout>,
    ) -> JobReport {
        self.publish(job, status).await;

        if let Some(failure) = &failure
            && let Err(e) = self.ledger.record_failure(job.job_id(), failure).await
        {
            warn!(error = %e, "failed to record job failure");
        }

        let report = JobReport::build(job, failure, facts);

        if let Some(layout) = layout
            && let Some(summary) = report.manifest_summary()
            && let Err(e) = layout.write_summary(&summary).await
        {
            warn!(error = %e, "failed to write manifest summary");
        }

        info!(
            status = %report.status,
            completed = report.completed_pages,
            failed = report.failed_pages,
            total = report.total_pages,
            fallback = report.fallback_to_tiles,
            failure = report.failure.as_ref().map(ToString::to_string),
            "job finished"
        );
        report
    }

    async fn publish(&self, job: &mut AcquisitionJob, status: JobStatus) {
        if job.status() == status || job.status().is_terminal() {
            return;
        }
        job.set_status(status);
        // Ledger lag never stops the job.
        if let Err(e) = self.ledger.update_status(job.job_id(), status).await {
            warn!(%status, error = %e, "failed to publish job status");
        }
    }
}
