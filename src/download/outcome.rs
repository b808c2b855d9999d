//! Per-item outcomes and the run summary.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of fetching one page (or the native PDF).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    /// 0-based page index (0 for a native PDF).
    pub index: usize,
    /// Network attempts made; 0 when the file was already on disk.
    pub attempt_count: u32,
    /// Last error seen, retained for the final summary.
    pub last_error: Option<String>,
    /// Set when the item ended up on disk.
    pub completed_at: Option<DateTime<Utc>>,
    /// Bytes on disk for this item.
    pub bytes_written: u64,
    /// True when an existing file satisfied the item without network I/O.
    pub resumed: bool,
}

impl DownloadOutcome {
    /// Fetched successfully after `attempt_count` attempts.
    #[must_use]
    pub fn succeeded(index: usize, attempt_count: u32, bytes_written: u64) -> Self {
        Self {
            index,
            attempt_count,
            last_error: None,
            completed_at: Some(Utc::now()),
            bytes_written,
            resumed: false,
        }
    }

    /// Already present on disk from an earlier run.
    #[must_use]
    pub fn resumed(index: usize, bytes_on_disk: u64) -> Self {
        Self {
            index,
            attempt_count: 0,
            last_error: None,
            completed_at: Some(Utc::now()),
            bytes_written: bytes_on_disk,
            resumed: true,
        }
    }

    /// Permanently failed.
    #[must_use]
    pub fn failed(index: usize, attempt_count: u32, last_error: impl Into<String>) -> Self {
        Self {
            index,
            attempt_count,
            last_error: Some(last_error.into()),
            completed_at: None,
            bytes_written: 0,
            resumed: false,
        }
    }

    /// True if the item is on disk.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Aggregate result of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    /// Items in the target, attempted or not.
    pub total: usize,
    /// Outcomes of attempted items, sorted by index.
    pub outcomes: Vec<DownloadOutcome>,
    /// Retries performed across all items.
    pub retried: usize,
    /// Cooldown windows opened by `Blocking` responses.
    pub cooldowns: usize,
    /// True if the run stopped early on cancellation.
    pub cancelled: bool,
}

impl DownloadSummary {
    /// Items on disk (fetched or resumed).
    #[must_use]
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Items that permanently failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    /// Items satisfied by files from an earlier run.
    #[must_use]
    pub fn resumed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.resumed).count()
    }

    /// Items never attempted because the run was cancelled.
    #[must_use]
    pub fn not_attempted(&self) -> usize {
        self.total.saturating_sub(self.outcomes.len())
    }

    /// Failed outcomes, in index order.
    pub fn failures(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Share of the target that did not end up on disk.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.total - self.completed()) as f64 / self.total as f64
    }
}
