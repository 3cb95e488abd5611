//! S3 transport module
//!
//! Defines the narrow object-storage capability the upload pipeline depends
//! on, and its AWS S3 implementation.
//!
//! # Design
//!
//! - [`ObjectStore`] is the only transport surface the core sees: put one
//!   object, streamed from an open file.
//! - [`S3Store`] implements it with the AWS SDK. It is built once by the
//!   composition root from [`S3Config`]; the pipeline never touches
//!   credentials, sessions or SDK configuration.
//!
//! # Example
//!
//! ```no_run
//! use funnel::config::S3Config;
//! use funnel::s3::{ObjectStore, S3Store};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = S3Config {
//!     bucket: "my-bucket".to_string(),
//!     region: "us-east-1".to_string(),
//!     ..Default::default()
//! };
//!
//! let store = S3Store::new(&config).await?;
//! let file = tokio::fs::File::open("/tmp/report.csv").await?;
//! store.put_object("my-bucket", "reports/report.csv", file).await?;
//! # Ok(())
//! # }
//! ```

pub mod credentials;

use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use credentials::CredentialsError;
use thiserror::Error;
use tokio::fs::File;

/// Errors returned by an object store while transferring an object
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to read object body: {0}")]
    Body(String),

    #[error("{0}")]
    Request(String),
}

/// S3 store construction errors
#[derive(Error, Debug)]
pub enum S3StoreError {
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Object-storage capability used by the uploader.
///
/// The body is handed over as an open file; implementations own it and drop
/// it when the transfer finishes, whatever the outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` in `bucket`
    async fn put_object(&self, bucket: &str, key: &str, body: File) -> Result<(), TransportError>;
}

/// AWS S3 implementation of [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    region: String,
}

impl S3Store {
    /// Build an S3 client from configuration.
    ///
    /// Static credentials are used when both keys are configured, otherwise
    /// the AWS default provider chain (environment, profile, instance role).
    pub async fn new(config: &S3Config) -> Result<Self, S3StoreError> {
        if config.region.trim().is_empty() {
            return Err(S3StoreError::Config("region is required".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some(creds) = credentials::static_credentials(config)? {
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = loader.load().await;

        let attempts = config.max_sdk_retries.saturating_add(1);
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .retry_config(RetryConfig::standard().with_max_attempts(attempts));

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::debug!(
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 client configured"
        );

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            region: config.region.clone(),
        })
    }

    /// Region the client was configured for
    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(s3.bucket = %bucket, s3.key = %key),
        err
    )]
    async fn put_object(&self, bucket: &str, key: &str, body: File) -> Result<(), TransportError> {
        let stream = ByteStream::read_from()
            .file(body)
            .build()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(stream)
            .send()
            .await
            .map_err(|e| TransportError::Request(DisplayErrorContext(&e).to_string()))?;

        tracing::debug!(etag = ?output.e_tag(), "PutObject completed");

        Ok(())
    }
}
