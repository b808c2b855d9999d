//! Side effects behind each active flow state.
//!
//! Every step returns the [`FlowEvent`] describing its result; none of
//! them decides where the flow goes next.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::AcquisitionEngine;
use super::report::RunFacts;
use crate::download::{
    DownloadOutcome, DownloadTarget, ExecutionContext, ExecutorError,
};
use crate::flow::{FlowEvent, TileVerdict};
use crate::job::AcquisitionJob;
use crate::output::OutputLayout;
use crate::pdf::{self, ExtractionError};

impl AcquisitionEngine {
    pub(super) async fn step_native_pdf(
        &self,
        ctx: &ExecutionContext,
        pdf_url: &str,
        layout: &OutputLayout,
        facts: &mut RunFacts,
    ) -> Result<FlowEvent, ExecutorError> {
        let target = DownloadTarget::NativePdf {
            url: pdf_url.to_string(),
            dest: layout.native_pdf_path(),
        };
        let summary = self.executor.execute(ctx, target).await?;

        if summary.completed() == 1 {
            return Ok(FlowEvent::PdfDownloaded);
        }
        if summary.cancelled {
            return Ok(FlowEvent::Cancelled);
        }
        let reason = summary
            .failures()
            .find_map(|o| o.last_error.clone())
            .unwrap_or_else(|| "native PDF download failed".to_string());
        warn!(url = pdf_url, %reason, "native PDF unavailable; falling back to page images");
        facts.native_pdf_error = Some(reason);
        facts.fallback_to_tiles = true;
        Ok(FlowEvent::PdfUnavailable)
    }

    pub(super) async fn step_extract(
        &self,
        ctx: &ExecutionContext,
        job: &AcquisitionJob,
        layout: &OutputLayout,
        facts: &mut RunFacts,
    ) -> FlowEvent {
        let pdf_path = layout.native_pdf_path();
        let staging = layout.staging_dir();
        let expected = job.pages().len();

        let extracted = {
            let pdf_path = pdf_path.clone();
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || {
                pdf::extract_page_images(&pdf_path, &staging, expected)
            })
            .await
        };

        let result = match extracted {
            Ok(Ok(staged)) => promote_staged_pages(&staged, &layout.pages_dir()).await,
            Ok(Err(e)) => Err(e),
            Err(join_error) => Err(ExtractionError::Open {
                path: pdf_path.clone(),
                reason: format!("extraction task failed: {join_error}"),
            }),
        };
        let _ = tokio::fs::remove_dir_all(&staging).await;

        match result {
            Ok(pages) => {
                info!(pages = pages.len(), "pages extracted from native PDF");
                for (index, bytes) in pages.into_iter().enumerate() {
                    let outcome = DownloadOutcome::succeeded(index, 1, bytes);
                    if let Err(e) = self
                        .ledger
                        .record_page_outcome(ctx.job_id, index, &outcome)
                        .await
                    {
                        warn!(index, error = %e, "failed to record page outcome");
                    }
                }
                facts.pdf_artifact = Some(pdf_path);
                facts.pages_extracted = true;
                FlowEvent::PagesExtracted
            }
            Err(e) => {
                warn!(error = %e, "native PDF unusable; falling back to page images");
                // A corrupt PDF must not be mistaken for the job's artifact on resume.
                if let Err(remove_error) = tokio::fs::remove_file(&pdf_path).await {
                    warn!(
                        path = %pdf_path.display(),
                        error = %remove_error,
                        "failed to delete unusable PDF"
                    );
                }
                facts.extraction_error = Some(e.to_string());
                facts.fallback_to_tiles = true;
                FlowEvent::ExtractionFailed
            }
        }
    }

    pub(super) async fn step_tiles(
        &self,
        ctx: &ExecutionContext,
        job: &AcquisitionJob,
        layout: &OutputLayout,
        facts: &mut RunFacts,
    ) -> Result<FlowEvent, ExecutorError> {
        let target = DownloadTarget::Pages {
            pages: job.pages().to_vec(),
            image_dir: layout.pages_dir(),
        };
        let summary = self.executor.execute(ctx, target).await?;

        let event = if summary.cancelled {
            FlowEvent::Cancelled
        } else {
            FlowEvent::TilesFinished(TileVerdict::from_summary(
                &summary,
                self.config.partial_failure_tolerance,
            ))
        };
        facts.tiles = Some(summary);
        Ok(event)
    }

    pub(super) async fn step_generate_pdf(
        &self,
        job: &AcquisitionJob,
        layout: &OutputLayout,
        facts: &mut RunFacts,
    ) -> FlowEvent {
        let pages_dir = layout.pages_dir();
        let images: Vec<PathBuf> = job
            .pages()
            .iter()
            .map(|page| pages_dir.join(page.target_filename()))
            .collect();
        let output = layout.compiled_pdf_path();

        let generated = {
            let output = output.clone();
            tokio::task::spawn_blocking(move || pdf::generate_pdf_from_images(&images, &output))
                .await
        };

        match generated {
            Ok(Ok(())) => {
                info!(path = %output.display(), "compiled PDF from page images");
                facts.pdf_artifact = Some(output);
                FlowEvent::PdfGenerated
            }
            Ok(Err(e)) => {
                warn!(error = %e, "PDF generation failed; page images are intact");
                FlowEvent::PdfGenerationFailed
            }
            Err(join_error) => {
                warn!(error = %join_error, "PDF generation task failed");
                FlowEvent::PdfGenerationFailed
            }
        }
    }
}

/// Moves staged pages into the page directory, returning each page's size.
async fn promote_staged_pages(
    staged: &[PathBuf],
    pages_dir: &Path,
) -> Result<Vec<u64>, ExtractionError> {
    let io_error = |path: &Path, source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut sizes = Vec::with_capacity(staged.len());
    for source in staged {
        let Some(name) = source.file_name() else {
            continue;
        };
        let dest = pages_dir.join(name);
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| io_error(source, e))?
            .len();
        tokio::fs::rename(source, &dest)
            .await
            .map_err(|e| io_error(&dest, e))?;
        sizes.push(size);
    }
    Ok(sizes)
}
