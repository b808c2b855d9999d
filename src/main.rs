//! CLI entry point for the IIIF acquisition tool.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use acquire_core::{
    AcquisitionEngine, Database, EngineConfig, InMemoryLedger, JobLedger, JobReport, JobStatus,
    SqliteLedger,
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use uuid::Uuid;

mod cli;

use cli::Args;

/// Process outcome, mapped onto the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    /// Every page is on disk.
    Success,
    /// Usable output with gaps.
    Partial,
    /// No usable output, or the run could not start.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(1),
            ProcessExit::Failure => ExitCode::from(2),
        }
    }
}

fn determine_exit_outcome(status: JobStatus) -> ProcessExit {
    match status {
        JobStatus::Completed => ProcessExit::Success,
        JobStatus::PartiallyCompleted => ProcessExit::Partial,
        _ => ProcessExit::Failure,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(args.default_log_level());
    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ProcessExit::Failure.into()
        }
    }
}

fn init_tracing(default_level: &str) {
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

async fn run(args: Args) -> Result<ProcessExit> {
    let config = load_config(&args)?;
    let ledger = open_ledger(&config).await?;

    let engine = AcquisitionEngine::new(config, Arc::clone(&ledger))
        .context("failed to initialize acquisition engine")?;
    if let Some(resolver) = engine.registry().find_resolver(&args.input) {
        info!(resolver = resolver.name(), input = %args.input, "Starting acquisition");
    }

    let handle = engine.spawn(args.input.clone());
    let job_id = handle.job_id();

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after in-flight requests");
            cancel.cancel();
        }
    });

    let use_progress_bar =
        io::stderr().is_terminal() && !args.quiet && !is_dumb_terminal();
    let stop = Arc::new(AtomicBool::new(!use_progress_bar));
    let progress = use_progress_bar
        .then(|| spawn_progress_ui(Arc::clone(&ledger), job_id, Arc::clone(&stop)));

    let result = handle.wait().await;

    stop.store(true, Ordering::SeqCst);
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    let report = result.context("acquisition did not finish")?;
    print_completion_summary(&report);
    Ok(determine_exit_outcome(report.status))
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.is_file() {
                bail!("config file not found: {}", path.display());
            }
            EngineConfig::load(path)?
        }
        None => EngineConfig::load_default()?,
    };
    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

async fn open_ledger(config: &EngineConfig) -> Result<Arc<dyn JobLedger>> {
    match &config.ledger_path {
        Some(path) => {
            let db = Database::new(path)
                .await
                .with_context(|| format!("failed to open ledger at {}", path.display()))?;
            debug!(path = %path.display(), "using SQLite job ledger");
            Ok(Arc::new(SqliteLedger::new(db)))
        }
        None => Ok(Arc::new(InMemoryLedger::new())),
    }
}

fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

/// Polls the ledger snapshot until `stop` is set.
fn spawn_progress_ui(
    ledger: Arc<dyn JobLedger>,
    job_id: Uuid,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            if let Ok(Some(record)) = ledger.read(job_id).await {
                bar.set_length(u64::try_from(record.total_pages).unwrap_or(0));
                bar.set_position(u64::try_from(record.processed_pages()).unwrap_or(0));
                let label = record.document_id.as_deref().unwrap_or("resolving");
                bar.set_message(format!("{label} ({})", record.status));
            }
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        bar.finish_and_clear();
    })
}

fn print_completion_summary(report: &JobReport) {
    match &report.reference {
        Some(reference) => println!(
            "{} [{}] {}",
            reference.display_label(),
            reference.source_id(),
            reference.document_id()
        ),
        None => println!("(unresolved)"),
    }
    println!(
        "Status: {} ({}/{} pages)",
        report.status, report.completed_pages, report.total_pages
    );
    if report.fallback_to_tiles {
        println!("Native PDF was unusable; pages were downloaded as images.");
        if let Some(reason) = report
            .native_pdf_error
            .as_ref()
            .or(report.extraction_error.as_ref())
        {
            println!("  Reason: {reason}");
        }
    }
    if !report.failed_indices.is_empty() {
        let pages: Vec<String> = report
            .failed_indices
            .iter()
            .map(|index| (index + 1).to_string())
            .collect();
        println!("Missing pages: {}", pages.join(", "));
    }
    if let Some(dir) = &report.output_dir {
        println!("Output: {}", dir.display());
    }
    if let Some(pdf) = &report.pdf_artifact {
        println!("PDF: {}", pdf.display());
    }
    if let Some(failure) = &report.failure {
        println!("Failure: {failure}");
    }
    if report.status == JobStatus::PartiallyCompleted {
        println!("Run again with the same input to retry missing pages.");
    }
}
