//! Golden Flow: the acquisition decision procedure as an explicit state
//! machine.
//!
//! ```text
//! Resolved ──Start──▶ NativePdfAttempt ──PdfDownloaded──▶ Extraction ──PagesExtracted──▶ Completed
//!    │                      │                                  │
//!    │               PdfUnavailable                     ExtractionFailed
//!    │                      ▼                                  │
//!    └──Start──────▶ TileDownload ◀────────────────────────────┘
//!                           │ TilesFinished(verdict)
//!                           ▼
//!          AutoPdfGeneration ─▶ Completed | PartiallyCompleted
//!          (or directly Completed | PartiallyCompleted | Failed)
//! ```
//!
//! [`transition`] is pure. The engine performs the side effect each state
//! names and feeds the result back in as a [`FlowEvent`]. No edge leads
//! back to an earlier state, so every job does bounded work.

use thiserror::Error;

use crate::download::DownloadSummary;
use crate::job::{JobFailure, JobStatus};

/// Inputs that steer branch selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowSettings {
    /// The reference carries a native PDF URL.
    pub has_native_pdf: bool,
    /// Skip the native PDF even when one exists.
    pub prefer_images: bool,
    /// Assemble a PDF from downloaded tiles.
    pub auto_generate_pdf: bool,
}

/// Controller states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    /// Manifest resolved; nothing fetched yet.
    Resolved,
    /// Downloading the library's PDF.
    NativePdfAttempt,
    /// Downloading page images through the image service.
    TileDownload,
    /// Pulling page images out of the downloaded PDF.
    Extraction,
    /// Building a PDF from downloaded tiles.
    AutoPdfGeneration {
        /// Some tiles were missing; the best outcome is `PartiallyCompleted`.
        tiles_partial: bool,
    },
    /// Every page is on disk.
    Completed,
    /// Usable output with gaps, or without the requested PDF.
    PartiallyCompleted,
    /// No usable output.
    Failed(JobFailure),
}

impl FlowState {
    /// True for `Completed`, `PartiallyCompleted` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed(_)
        )
    }

    /// Job status published while in this state.
    #[must_use]
    pub fn job_status(&self) -> JobStatus {
        match self {
            Self::Resolved => JobStatus::Resolving,
            Self::NativePdfAttempt | Self::TileDownload => JobStatus::Downloading,
            Self::Extraction => JobStatus::Extracting,
            Self::AutoPdfGeneration { .. } => JobStatus::GeneratingPdf,
            Self::Completed => JobStatus::Completed,
            Self::PartiallyCompleted => JobStatus::PartiallyCompleted,
            Self::Failed(_) => JobStatus::Failed,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::NativePdfAttempt => "native_pdf_attempt",
            Self::TileDownload => "tile_download",
            Self::Extraction => "extraction",
            Self::AutoPdfGeneration { .. } => "auto_pdf_generation",
            Self::Completed => "completed",
            Self::PartiallyCompleted => "partially_completed",
            Self::Failed(_) => "failed",
        }
    }
}

/// How a tile download ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileVerdict {
    /// Failures, if any, are within tolerance.
    Clean,
    /// More pages failed than the tolerance allows.
    Partial {
        /// Pages not on disk.
        failed: usize,
    },
    /// No page made it to disk.
    AllFailed {
        /// Pages not on disk.
        failed: usize,
    },
}

impl TileVerdict {
    /// Grades a tile run.
    ///
    /// `tolerance` is the share of pages allowed to be missing while still
    /// counting as `Clean`; `0.0` means any missing page makes it `Partial`.
    #[must_use]
    pub fn from_summary(summary: &DownloadSummary, tolerance: f64) -> Self {
        let failed = summary.total.saturating_sub(summary.completed());
        if failed == 0 {
            Self::Clean
        } else if failed == summary.total {
            Self::AllFailed { failed }
        } else if summary.failure_ratio() > tolerance {
            Self::Partial { failed }
        } else {
            Self::Clean
        }
    }
}

/// Results the engine feeds back into the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    /// Begin acquisition.
    Start,
    /// The native PDF is on disk.
    PdfDownloaded,
    /// The native PDF could not be downloaded.
    PdfUnavailable,
    /// Every PDF page was extracted into the page directory.
    PagesExtracted,
    /// The PDF was corrupt, encrypted, or did not match the manifest.
    ExtractionFailed,
    /// Tile download settled.
    TilesFinished(TileVerdict),
    /// Auto-PDF written.
    PdfGenerated,
    /// Auto-PDF could not be written.
    PdfGenerationFailed,
    /// The job's cancellation signal fired.
    Cancelled,
}

/// Controller errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// The event is not valid in the current state.
    #[error("event {event:?} is not valid in state '{state}'")]
    IllegalTransition {
        /// State name.
        state: &'static str,
        /// Offending event.
        event: FlowEvent,
    },
}

/// Applies `event` to `state`.
///
/// Terminal states absorb every event unchanged.
///
/// # Errors
///
/// Returns [`FlowError::IllegalTransition`] for an event that does not
/// belong to the current non-terminal state.
pub fn transition(
    state: &FlowState,
    event: FlowEvent,
    settings: &FlowSettings,
) -> Result<FlowState, FlowError> {
    use FlowEvent as E;
    use FlowState as S;

    if state.is_terminal() {
        return Ok(state.clone());
    }

    let next = match (state, event) {
        (_, E::Cancelled) => S::Failed(JobFailure::Cancelled),

        (S::Resolved, E::Start) => {
            if settings.has_native_pdf && !settings.prefer_images {
                S::NativePdfAttempt
            } else {
                S::TileDownload
            }
        }

        (S::NativePdfAttempt, E::PdfDownloaded) => S::Extraction,
        (S::NativePdfAttempt, E::PdfUnavailable) | (S::Extraction, E::ExtractionFailed) => {
            S::TileDownload
        }
        (S::Extraction, E::PagesExtracted) => S::Completed,

        (S::TileDownload, E::TilesFinished(verdict)) => tiles_finished(verdict, settings),

        (S::AutoPdfGeneration { tiles_partial }, E::PdfGenerated) => {
            if *tiles_partial {
                S::PartiallyCompleted
            } else {
                S::Completed
            }
        }
        (S::AutoPdfGeneration { .. }, E::PdfGenerationFailed) => S::PartiallyCompleted,

        (state, event) => {
            return Err(FlowError::IllegalTransition {
                state: state.name(),
                event,
            });
        }
    };

    Ok(next)
}

/// Tiles only run when no native PDF survived, so auto-generation is
/// allowed whenever it is configured.
fn tiles_finished(verdict: TileVerdict, settings: &FlowSettings) -> FlowState {
    match verdict {
        TileVerdict::AllFailed { failed } => {
            FlowState::Failed(JobFailure::AllPagesFailed { failed })
        }
        TileVerdict::Clean if settings.auto_generate_pdf => FlowState::AutoPdfGeneration {
            tiles_partial: false,
        },
        TileVerdict::Partial { .. } if settings.auto_generate_pdf => {
            FlowState::AutoPdfGeneration {
                tiles_partial: true,
            }
        }
        TileVerdict::Clean => FlowState::Completed,
        TileVerdict::Partial { .. } => FlowState::PartiallyCompleted,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::DownloadOutcome;

    const PDF: FlowSettings = FlowSettings {
        has_native_pdf: true,
        prefer_images: false,
        auto_generate_pdf: false,
    };
    const TILES: FlowSettings = FlowSettings {
        has_native_pdf: false,
        prefer_images: false,
        auto_generate_pdf: false,
    };
    const TILES_AUTO: FlowSettings = FlowSettings {
        has_native_pdf: false,
        prefer_images: false,
        auto_generate_pdf: true,
    };

    fn run(settings: &FlowSettings, events: Vec<FlowEvent>) -> FlowState {
        events
            .into_iter()
            .fold(FlowState::Resolved, |state, event| {
                transition(&state, event, settings).unwrap()
            })
    }

    fn summary(succeeded: usize, failed: usize) -> DownloadSummary {
        let mut outcomes: Vec<_> = (0..succeeded)
            .map(|i| DownloadOutcome::succeeded(i, 1, 2048))
            .collect();
        outcomes.extend(
            (succeeded..succeeded + failed).map(|i| DownloadOutcome::failed(i, 3, "x")),
        );
        DownloadSummary {
            total: succeeded + failed,
            outcomes,
            retried: 0,
            cooldowns: 0,
            cancelled: false,
        }
    }

    #[test]
    fn test_start_prefers_native_pdf() {
        assert_eq!(run(&PDF, vec![FlowEvent::Start]), FlowState::NativePdfAttempt);
        assert_eq!(run(&TILES, vec![FlowEvent::Start]), FlowState::TileDownload);
    }

    #[test]
    fn test_prefer_images_forces_tiles() {
        let settings = FlowSettings {
            prefer_images: true,
            ..PDF
        };
        assert_eq!(run(&settings, vec![FlowEvent::Start]), FlowState::TileDownload);
    }

    #[test]
    fn test_native_pdf_happy_path() {
        let state = run(
            &PDF,
            vec![
                FlowEvent::Start,
                FlowEvent::PdfDownloaded,
                FlowEvent::PagesExtracted,
            ],
        );
        assert_eq!(state, FlowState::Completed);
    }

    #[test]
    fn test_extraction_failure_falls_back_to_tiles() {
        let state = run(
            &PDF,
            vec![
                FlowEvent::Start,
                FlowEvent::PdfDownloaded,
                FlowEvent::ExtractionFailed,
            ],
        );
        assert_eq!(state, FlowState::TileDownload);

        let done = transition(
            &state,
            FlowEvent::TilesFinished(TileVerdict::Clean),
            &PDF,
        )
        .unwrap();
        assert_eq!(done, FlowState::Completed);
    }

    #[test]
    fn test_pdf_download_failure_falls_back_to_tiles() {
        let state = run(&PDF, vec![FlowEvent::Start, FlowEvent::PdfUnavailable]);
        assert_eq!(state, FlowState::TileDownload);
    }

    #[test]
    fn test_tile_verdicts_without_auto_pdf() {
        let finish = |verdict| {
            run(
                &TILES,
                vec![FlowEvent::Start, FlowEvent::TilesFinished(verdict)],
            )
        };
        assert_eq!(finish(TileVerdict::Clean), FlowState::Completed);
        assert_eq!(
            finish(TileVerdict::Partial { failed: 2 }),
            FlowState::PartiallyCompleted
        );
        assert_eq!(
            finish(TileVerdict::AllFailed { failed: 10 }),
            FlowState::Failed(JobFailure::AllPagesFailed { failed: 10 })
        );
    }

    #[test]
    fn test_auto_pdf_generation_paths() {
        let clean = run(
            &TILES_AUTO,
            vec![
                FlowEvent::Start,
                FlowEvent::TilesFinished(TileVerdict::Clean),
            ],
        );
        assert_eq!(
            clean,
            FlowState::AutoPdfGeneration {
                tiles_partial: false
            }
        );
        assert_eq!(
            transition(&clean, FlowEvent::PdfGenerated, &TILES_AUTO).unwrap(),
            FlowState::Completed
        );
        assert_eq!(
            transition(&clean, FlowEvent::PdfGenerationFailed, &TILES_AUTO).unwrap(),
            FlowState::PartiallyCompleted
        );

        let partial = FlowState::AutoPdfGeneration {
            tiles_partial: true,
        };
        assert_eq!(
            transition(&partial, FlowEvent::PdfGenerated, &TILES_AUTO).unwrap(),
            FlowState::PartiallyCompleted
        );
    }

    #[test]
    fn test_all_failed_skips_auto_pdf() {
        let state = run(
            &TILES_AUTO,
            vec![
                FlowEvent::Start,
                FlowEvent::TilesFinished(TileVerdict::AllFailed { failed: 3 }),
            ],
        );
        assert_eq!(
            state,
            FlowState::Failed(JobFailure::AllPagesFailed { failed: 3 })
        );
    }

    #[test]
    fn test_cancel_from_any_active_state() {
        for state in [
            FlowState::Resolved,
            FlowState::NativePdfAttempt,
            FlowState::TileDownload,
            FlowState::Extraction,
            FlowState::AutoPdfGeneration {
                tiles_partial: false,
            },
        ] {
            assert_eq!(
                transition(&state, FlowEvent::Cancelled, &PDF).unwrap(),
                FlowState::Failed(JobFailure::Cancelled)
            );
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let err = transition(&FlowState::Resolved, FlowEvent::PagesExtracted, &PDF).unwrap_err();
        assert_eq!(
            err,
            FlowError::IllegalTransition {
                state: "resolved",
                event: FlowEvent::PagesExtracted
            }
        );
        assert!(transition(&FlowState::TileDownload, FlowEvent::PdfDownloaded, &PDF).is_err());
        assert!(transition(&FlowState::NativePdfAttempt, FlowEvent::Start, &PDF).is_err());
    }

    #[test]
    fn test_terminal_states_absorb_events() {
        for state in [
            FlowState::Completed,
            FlowState::PartiallyCompleted,
            FlowState::Failed(JobFailure::Cancelled),
        ] {
            for event in [FlowEvent::Start, FlowEvent::Cancelled, FlowEvent::PdfGenerated] {
                assert_eq!(transition(&state, event, &PDF).unwrap(), state);
            }
        }
    }

    #[test]
    fn test_job_status_mapping() {
        assert_eq!(FlowState::Resolved.job_status(), JobStatus::Resolving);
        assert_eq!(FlowState::TileDownload.job_status(), JobStatus::Downloading);
        assert_eq!(FlowState::Extraction.job_status(), JobStatus::Extracting);
        assert_eq!(
            FlowState::AutoPdfGeneration {
                tiles_partial: true
            }
            .job_status(),
            JobStatus::GeneratingPdf
        );
        assert_eq!(
            FlowState::Failed(JobFailure::Cancelled).job_status(),
            JobStatus::Failed
        );
    }

    #[test]
    fn test_verdict_from_summary() {
        assert_eq!(TileVerdict::from_summary(&summary(10, 0), 0.0), TileVerdict::Clean);
        assert_eq!(
            TileVerdict::from_summary(&summary(8, 2), 0.0),
            TileVerdict::Partial { failed: 2 }
        );
        assert_eq!(TileVerdict::from_summary(&summary(8, 2), 0.25), TileVerdict::Clean);
        assert_eq!(
            TileVerdict::from_summary(&summary(0, 10), 1.0),
            TileVerdict::AllFailed { failed: 10 }
        );
    }

    #[test]
    fn test_verdict_counts_unattempted_pages() {
        let mut cancelled = summary(3, 0);
        cancelled.total = 5;
        assert_eq!(
            TileVerdict::from_summary(&cancelled, 0.0),
            TileVerdict::Partial { failed: 2 }
        );
    }
}
