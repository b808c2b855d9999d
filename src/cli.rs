//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use acquire_core::EngineConfig;
use clap::Parser;

/// Acquire the page images of a digitized manuscript.
///
/// INPUT may be a shelfmark (`Urb. lat. 1779`), a Gallica ARK or short id,
/// a Bodleian UUID, a library viewer URL, or a direct IIIF manifest URL.
#[derive(Parser, Debug)]
#[command(name = "iiif-acquire")]
#[command(author, version, about)]
pub struct Args {
    /// Manuscript reference to acquire
    pub input: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Concurrent page downloads (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub workers: Option<u8>,

    /// Attempts per page before giving up (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub retries: Option<u32>,

    /// Download page images even when the library offers a PDF
    #[arg(long)]
    pub prefer_images: bool,

    /// Assemble a PDF from downloaded page images
    #[arg(long)]
    pub auto_pdf: bool,

    /// Directory that receives one folder per manuscript
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/iiif-acquire/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// SQLite job ledger (default: in-memory)
    #[arg(long)]
    pub ledger: Option<PathBuf>,
}

impl Args {
    /// Default log level for `-q`/`-v`, used when `RUST_LOG` is unset.
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// Applies command-line overrides on top of file values.
    pub fn apply_to(&self, config: &mut EngineConfig) {
        if let Some(workers) = self.workers {
            config.download_workers = usize::from(workers);
        }
        if let Some(retries) = self.retries {
            config.retry_attempts = retries;
        }
        if self.prefer_images {
            config.prefer_images = true;
        }
        if self.auto_pdf {
            config.auto_generate_pdf = true;
        }
        if let Some(dir) = &self.output_dir {
            config.downloads_dir.clone_from(dir);
        }
        if let Some(path) = &self.ledger {
            config.ledger_path = Some(path.clone());
        }
    }
}
