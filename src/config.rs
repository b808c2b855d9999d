//! Engine configuration.
//!
//! Loaded from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! download_workers = 6
//! prefer_images = true
//! partial_failure_tolerance = 0.05
//! downloads_dir = "/data/manuscripts"
//! ```

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::download::DEFAULT_CONCURRENCY;
use crate::transport::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SECS, RetryPolicy,
    TransportSettings,
};

const CONFIG_DIR_NAME: &str = "iiif-acquire";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// TOML error, including line and column.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("Invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        /// Key name.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Concurrent page downloads per job.
    pub download_workers: usize,
    /// Skip a native PDF even when the manifest offers one.
    pub prefer_images: bool,
    /// Assemble `compiled.pdf` after a tile download.
    pub auto_generate_pdf: bool,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// TCP/TLS connect timeout.
    pub connect_timeout_secs: u64,
    /// Attempt cap per page, first attempt included.
    pub retry_attempts: u32,
    /// First retry delay.
    pub backoff_base_ms: u64,
    /// Upper bound on the backoff delay.
    pub backoff_max_ms: u64,
    /// Job-wide pause after a `Blocking` response.
    pub blocking_cooldown_secs: u64,
    /// Share of pages allowed to fail while the job still counts as `Completed`.
    pub partial_failure_tolerance: f64,
    /// Root for per-manuscript output directories.
    pub downloads_dir: PathBuf,
    /// SQLite ledger file; in-memory ledger when unset.
    pub ledger_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_workers: DEFAULT_CONCURRENCY,
            prefer_images: false,
            auto_generate_pdf: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: 1_000,
            backoff_max_ms: 32_000,
            blocking_cooldown_secs: 15,
            partial_failure_tolerance: 0.0,
            downloads_dir: PathBuf::from("downloads"),
            ledger_path: None,
        }
    }
}

impl EngineConfig {
    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=32).contains(&self.download_workers) {
            return Err(invalid("download_workers", self.download_workers, "1..=32"));
        }
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        if !(1..=10).contains(&self.retry_attempts) {
            return Err(invalid("retry_attempts", self.retry_attempts, "1..=10"));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid(
                "backoff_max_ms",
                self.backoff_max_ms,
                ">= backoff_base_ms",
            ));
        }
        if self.blocking_cooldown_secs > 3600 {
            return Err(invalid(
                "blocking_cooldown_secs",
                self.blocking_cooldown_secs,
                "0..=3600",
            ));
        }
        if !(0.0..=1.0).contains(&self.partial_failure_tolerance) {
            return Err(invalid(
                "partial_failure_tolerance",
                self.partial_failure_tolerance,
                "0.0..=1.0",
            ));
        }
        Ok(())
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but is unreadable or invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw, path)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Loads from [`resolve_default_config_path`], or defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but is invalid.
    pub fn load_default() -> Result<Self, ConfigError> {
        match resolve_default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Transport timeouts.
    #[must_use]
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Per-item retry policy.
    ///
    /// Jitter is capped at one base delay and a `Blocking` retry waits at
    /// least the cooldown window.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.backoff_base_ms);
        RetryPolicy::new(
            self.retry_attempts,
            base,
            Duration::from_millis(self.backoff_max_ms),
        )
        .with_max_jitter(base)
        .with_blocking_floor(self.blocking_cooldown())
    }

    /// Cooldown window opened by a `Blocking` response.
    #[must_use]
    pub fn blocking_cooldown(&self) -> Duration {
        Duration::from_secs(self.blocking_cooldown_secs)
    }
}

fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
        expected,
    }
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if (1..=3600).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, value, "1..=3600"))
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/iiif-acquire/config.toml`
/// 2. `$HOME/.config/iiif-acquire/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(
        env_var_non_empty_os("XDG_CONFIG_HOME"),
        env_var_non_empty_os("HOME"),
    )
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(xdg_config_home) = xdg_config_home {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        );
    }
    Some(
        PathBuf::from(home?)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
