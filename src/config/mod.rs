//! Configuration module for funnel
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion, and validation of the merged result once
//! command-line overrides have been applied.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file.
    ///
    /// The result is not validated: region and bucket may still arrive from
    /// command-line flags. Call [`Config::validate`] once everything is merged.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.region.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "must provide an AWS region where your S3 bucket exists".into(),
            ));
        }

        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "must specify an AWS S3 bucket to save files in".into(),
            ));
        }

        if self.upload.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.upload.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "upload.poll_interval_ms must be at least 1".into(),
            ));
        }

        if self.metrics.enabled && self.metrics.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "metrics.address cannot be empty when metrics are enabled".into(),
            ));
        }

        Ok(())
    }
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack). Forces path-style addressing.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    /// Retries performed by the SDK inside a single upload attempt
    pub max_sdk_retries: u32,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: String::new(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            max_sdk_retries: default_max_sdk_retries(),
        }
    }
}

fn default_max_sdk_retries() -> u32 {
    3
}

/// Upload pipeline configuration.
///
/// Immutable for the duration of a run. `concurrency` is kept signed so that
/// out-of-range values from the command line reach validation intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: i64,
    #[serde(default)]
    pub watch: bool,
    #[serde(default)]
    pub delete_after_upload: bool,
    #[serde(default = "default_key_template")]
    pub key_template: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fail_on_job_failure: bool,
}

impl UploadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            watch: false,
            delete_after_upload: false,
            key_template: default_key_template(),
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryConfig::default(),
            fail_on_job_failure: false,
        }
    }
}

fn default_concurrency() -> i64 {
    10
}

fn default_key_template() -> String {
    "{{ filePath }}".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Retry policy for failed upload attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per job before it is reported as failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry. Zero re-dispatches immediately.
    #[serde(default)]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: 0,
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
