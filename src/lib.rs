//! funnel library
//!
//! Concurrent uploader that funnels local files and directories into an S3
//! bucket.
//!
//! # Features
//!
//! - **Bounded worker pool**: 1-100 concurrent uploads fed by a rendezvous queue
//! - **Retries**: up to `max_attempts` per file, with optional exponential backoff
//! - **Key templates**: object keys derived from file metadata and the current date
//! - **Watch mode**: re-scan a file or directory on an interval until cancelled
//!
//! # Example
//!
//! ```no_run
//! use funnel::config::Config;
//! use funnel::pipeline::run_pipeline;
//! use funnel::s3::S3Store;
//! use funnel::upload::FileUploader;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("funnel.yaml")?;
//!     config.validate()?;
//!
//!     let store = Arc::new(S3Store::new(&config.s3).await?);
//!     let uploader = Arc::new(FileUploader::new(store, config.s3.bucket.clone()));
//!     let summary = run_pipeline(
//!         &[PathBuf::from("./outbox")],
//!         &config.upload,
//!         uploader,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!     println!("{summary:?}");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod enumerate;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod s3;
pub mod template;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{run_pipeline, Pipeline, PipelineError, RunSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
