use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;
use tracing::info;

use crate::monitor::jobs::{
    DEFAULT_MAX_CONCURRENT_CHECKS, DEFAULT_MAX_JOB_ATTEMPTS, DEFAULT_RETRY_BACKOFF, JobOptions,
};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{key} has invalid value `{value}`")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Keys accepted in the optional TOML file. Every key can be overridden by
/// the upper-cased environment variable of the same name.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_url: Option<String>,
    listen_addr: Option<String>,
    monitor_schedule: Option<String>,
    monitor_max_concurrent_checks: Option<usize>,
    monitor_max_job_attempts: Option<u32>,
    monitor_retry_backoff_ms: Option<u64>,
    log_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub database_url: Option<String>,
    pub listen_addr: String,
    /// Scheduler default when global settings name no schedule.
    pub monitor_schedule: Option<String>,
    pub max_concurrent_checks: usize,
    pub max_job_attempts: u32,
    pub retry_backoff: Duration,
    pub log_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            monitor_schedule: None,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            max_job_attempts: DEFAULT_MAX_JOB_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            log_dir: DEFAULT_LOG_DIR.to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads `.env`, then the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_sources(path, |key| env::var(key).ok())
    }

    pub fn from_sources(
        path: Option<&Path>,
        env_var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let file: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!(path = %path.display(), "Loaded configuration file.");
                file
            }
            None => FileConfig::default(),
        };

        let defaults = Self::default();
        let env_string = |key: &str| env_var(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: env_string("DATABASE_URL").or(file.database_url),
            listen_addr: env_string("LISTEN_ADDR")
                .or(file.listen_addr)
                .unwrap_or(defaults.listen_addr),
            monitor_schedule: env_string("MONITOR_SCHEDULE").or(file.monitor_schedule),
            max_concurrent_checks: parsed(&env_var, "MONITOR_MAX_CONCURRENT_CHECKS")?
                .or(file.monitor_max_concurrent_checks)
                .unwrap_or(defaults.max_concurrent_checks),
            max_job_attempts: parsed(&env_var, "MONITOR_MAX_JOB_ATTEMPTS")?
                .or(file.monitor_max_job_attempts)
                .unwrap_or(defaults.max_job_attempts),
            retry_backoff: parsed(&env_var, "MONITOR_RETRY_BACKOFF_MS")?
                .or(file.monitor_retry_backoff_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            log_dir: env_string("LOG_DIR")
                .or(file.log_dir)
                .unwrap_or(defaults.log_dir),
        })
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            max_concurrent: self.max_concurrent_checks,
            max_attempts: self.max_job_attempts,
            retry_backoff: self.retry_backoff,
        }
    }
}

fn parsed<T: std::str::FromStr>(
    env_var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env_var(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}
