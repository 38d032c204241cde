//! Configuration loader
//!
//! Loads worker configuration from an optional `.env` file and the
//! process environment. Values from the `.env` file take precedence,
//! which keeps local development overrides out of the system
//! environment.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load env file {path}: {message}")]
    EnvFileLoad { path: String, message: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Typed worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tracing filter, e.g. "info" or "aldatu=debug"
    pub log_filter: String,
    /// Base directory for the local storage adapter
    pub storage_root: PathBuf,
    /// Directory for per-step scratch files
    pub scratch_root: PathBuf,
    /// Conversion tool binary
    pub qemu_img_binary: String,
    /// Parallel step-command consumers
    pub consumer_count: usize,
    /// Bus poll interval
    pub poll_interval: Duration,
    /// Channel capacity of the in-process bus
    pub bus_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            storage_root: std::env::temp_dir().join("aldatu-storage"),
            scratch_root: std::env::temp_dir(),
            qemu_img_binary: "qemu-img".to_string(),
            consumer_count: 4,
            poll_interval: Duration::from_millis(250),
            bus_capacity: 256,
        }
    }
}

/// Loader for [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// `env_file_path` is loaded before the environment is read, if
    /// given.
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    pub fn load_worker_config(&self) -> Result<WorkerConfig> {
        if let Some(path) = &self.env_file_path {
            dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        }

        let defaults = WorkerConfig::default();
        let config = WorkerConfig {
            log_filter: env_or("ALDATU_LOG", defaults.log_filter),
            storage_root: PathBuf::from(env_or(
                "ALDATU_STORAGE_ROOT",
                defaults.storage_root.display().to_string(),
            )),
            scratch_root: PathBuf::from(env_or(
                "ALDATU_SCRATCH_ROOT",
                defaults.scratch_root.display().to_string(),
            )),
            qemu_img_binary: env_or("ALDATU_QEMU_IMG", defaults.qemu_img_binary),
            consumer_count: parse_env("ALDATU_CONSUMERS", defaults.consumer_count)?,
            poll_interval: Duration::from_millis(parse_env(
                "ALDATU_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            bus_capacity: parse_env("ALDATU_BUS_CAPACITY", defaults.bus_capacity)?,
        };

        if config.consumer_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ALDATU_CONSUMERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.bus_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ALDATU_BUS_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
