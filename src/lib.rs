//! IIIF Acquisition Core Library
//!
//! This library turns a loosely-specified manuscript reference (a shelfmark,
//! an ARK, a UUID or a manifest URL) into an ordered set of page images on
//! local disk, fetched from a IIIF digital library.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`resolver`] - Resolver set and dispatcher (raw input to manifest)
//! - [`manifest`] - IIIF v2/v3 manifest model
//! - [`flow`] - Golden Flow state machine (native PDF first, tiles as fallback)
//! - [`transport`] - Shared browser-like HTTP client, failure classification, retry policy
//! - [`download`] - Concurrent, resumable download executor with a blocking cooldown
//! - [`pdf`] - Native-PDF page extraction and page-image PDF assembly
//! - [`ledger`] - Job Ledger contract with in-memory and SQLite implementations
//! - [`engine`] - `AcquisitionEngine`: dispatch, plan, flow, report
//! - [`config`] - `EngineConfig` loading and validation
//! - [`db`] - SQLite connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod engine;
pub mod flow;
pub mod job;
pub mod ledger;
pub mod manifest;
pub mod output;
pub mod pdf;
pub mod resolver;
pub mod transport;
pub mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig, resolve_default_config_path};
pub use db::{Database, DbError};
pub use download::{DownloadExecutor, DownloadOutcome, DownloadSummary};
pub use engine::{AcquisitionEngine, AcquisitionHandle, EngineError, JobReport};
pub use flow::{FlowEvent, FlowState, TileVerdict};
pub use job::{AcquisitionJob, JobFailure, JobStatus, Strategy};
pub use ledger::{InMemoryLedger, JobLedger, JobRecord, LedgerError, SqliteLedger};
pub use manifest::{CanonicalManifestReference, Manifest, PageDescriptor};
pub use resolver::{ResolutionError, ResolverRegistry, build_default_registry};
pub use transport::{FailureType, RetryPolicy, Transport, TransportError, classify_error};
