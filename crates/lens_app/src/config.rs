//! Configuration for the `truthlens` binary.
//!
//! Read from a RON file; every field is optional and falls back to its default.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lens_core::{ConcurrencyPolicy, PollSettings};
use lens_engine::{ApiSettings, AtomicFileWriter, CacheSettings, PersistError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "truthlens.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize config: {0}")]
    Serialize(String),
    #[error("failed to write config: {0}")]
    Write(#[from] PersistError),
}

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults => f.write_str("built-in defaults"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensConfig {
    /// Base URL of the analysis backend.
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub news_budget_secs: u64,
    pub transcript_budget_secs: u64,
    pub max_poll_retries: u32,
    /// Refuse a second analysis instead of replacing the running one.
    pub reject_concurrent: bool,
    /// Directory of the durable cache tier. Defaults to the user data dir.
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    pub log_file: PathBuf,
}

impl Default for LensConfig {
    fn default() -> Self {
        let poll = PollSettings::default();
        let api = ApiSettings::default();
        Self {
            base_url: api.base_url,
            request_timeout_secs: api.request_timeout.as_secs(),
            poll_interval_ms: poll.poll_interval.as_millis() as u64,
            news_budget_secs: poll.news_budget.as_secs(),
            transcript_budget_secs: poll.transcript_budget.as_secs(),
            max_poll_retries: poll.max_poll_retries,
            reject_concurrent: false,
            cache_dir: None,
            cache_ttl_secs: CacheSettings::default().ttl.as_secs(),
            log_file: PathBuf::from("truthlens.log"),
        }
    }
}

impl LensConfig {
    /// Loads `path`; a missing file yields the defaults. Runs before logging
    /// is set up, so the caller logs the returned source.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok((Self::default(), ConfigSource::Defaults));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = ron::from_str(&content).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    /// Writes the configuration as pretty RON and returns the written path.
    pub fn write(&self, path: &Path) -> Result<PathBuf, ConfigError> {
        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(self, pretty)
            .map_err(|err| ConfigError::Serialize(err.to_string()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        Ok(AtomicFileWriter::new(dir).write(&filename, content.as_bytes())?)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            news_budget: Duration::from_secs(self.news_budget_secs),
            transcript_budget: Duration::from_secs(self.transcript_budget_secs),
            max_poll_retries: self.max_poll_retries,
            policy: if self.reject_concurrent {
                ConcurrencyPolicy::Reject
            } else {
                ConcurrencyPolicy::CancelPrevious
            },
        }
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.base_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..ApiSettings::default()
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            default_origin: self.base_url.clone(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("truthlens"))
                .unwrap_or_else(|| PathBuf::from(".truthlens"))
                .join("cache")
        })
    }
}
