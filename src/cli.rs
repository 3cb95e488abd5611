//! Command-line interface
//!
//! Flags override values from the optional YAML config file. The merged
//! result is validated before anything else runs.

use crate::config::{Config, ConfigError, LogFormat};
use clap::Parser;
use std::path::PathBuf;

/// Environment variable consulted when no region is configured
pub const REGION_ENV_VAR: &str = "AWS_DEFAULT_REGION";

/// funnel - upload files and directories to an S3 bucket, optionally
/// watching them for new files
#[derive(Parser, Debug, Default)]
#[command(name = "funnel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Files or directories to upload
    #[arg(value_name = "PATHS")]
    pub paths: Vec<PathBuf>,

    /// AWS region the bucket lives in [default: $AWS_DEFAULT_REGION]
    #[arg(short, long)]
    pub region: Option<String>,

    /// Bucket to upload into
    #[arg(short, long)]
    pub bucket: Option<String>,

    /// Keep re-scanning the path and uploading what is found
    #[arg(short, long)]
    pub watch: bool,

    /// Delete local files once they have been uploaded
    #[arg(short, long)]
    pub delete_after_upload: bool,

    /// Number of concurrent uploads (1-100) [default: 10]
    #[arg(short, long, allow_negative_numbers = true)]
    pub concurrency: Option<i64>,

    /// Template for object keys [default: "{{ filePath }}"]
    #[arg(short = 't', long)]
    pub key_template: Option<String>,

    /// Custom S3 endpoint, e.g. a local MinIO
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Path to a YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Attempts per file before it is reported as failed [default: 5]
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Delay before the first retry in milliseconds, doubled per retry [default: 0]
    #[arg(long)]
    pub retry_base_delay_ms: Option<u64>,

    /// Exit non-zero if any file failed to upload
    #[arg(long)]
    pub fail_on_job_failure: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<String>,

    /// Log filter (trace, debug, info, warn, error, or a RUST_LOG directive)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Load the config file, apply flag overrides and the region fallback,
    /// then validate
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        self.apply(&mut config);
        apply_region_fallback(&mut config, std::env::var(REGION_ENV_VAR).ok());
        config.validate()?;

        Ok(config)
    }

    /// Overwrite config values with every flag that was given
    pub fn apply(&self, config: &mut Config) {
        if let Some(region) = &self.region {
            config.s3.region = region.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.s3.bucket = bucket.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.s3.endpoint = Some(endpoint.clone());
        }

        let upload = &mut config.upload;
        if self.watch {
            upload.watch = true;
        }
        if self.delete_after_upload {
            upload.delete_after_upload = true;
        }
        if let Some(concurrency) = self.concurrency {
            upload.concurrency = concurrency;
        }
        if let Some(template) = &self.key_template {
            upload.key_template = template.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            upload.retry.max_attempts = max_attempts;
        }
        if let Some(delay) = self.retry_base_delay_ms {
            upload.retry.base_delay_ms = delay;
        }
        if self.fail_on_job_failure {
            upload.fail_on_job_failure = true;
        }

        if let Some(address) = &self.metrics_address {
            config.metrics.enabled = true;
            config.metrics.address = address.clone();
        }

        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

/// Use `region` when neither the file nor the flags set one
pub fn apply_region_fallback(config: &mut Config, region: Option<String>) {
    if !config.s3.region.trim().is_empty() {
        return;
    }
    if let Some(region) = region.filter(|r| !r.trim().is_empty()) {
        config.s3.region = region;
    }
}
