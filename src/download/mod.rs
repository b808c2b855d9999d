//! Concurrent, resumable download of page images or a native PDF.
//!
//! - [`DownloadExecutor`] - bounded task pool with retry and resume
//! - [`CooldownGate`] - job-wide pause after `Blocking` responses
//! - [`DownloadOutcome`] / [`DownloadSummary`] - per-item and per-run results

mod cooldown;
mod executor;
mod outcome;

pub use cooldown::CooldownGate;
pub use executor::{
    DEFAULT_CONCURRENCY, DownloadExecutor, DownloadTarget, ExecutionContext, ExecutorError,
    RESUME_MIN_BYTES,
};
pub use outcome::{DownloadOutcome, DownloadSummary};
