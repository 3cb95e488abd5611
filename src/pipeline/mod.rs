//! Upload pipeline
//!
//! A bounded worker pool draining a pending queue of [`UploadJob`]s. Each
//! attempt renders the job's key, uploads the file and optionally deletes it.
//! Successful jobs go to the completed queue; failed attempts are retried
//! until the job has collected `max_attempts` errors, then go to the failed
//! queue. One accounting task per terminal queue reports the job and
//! releases its in-flight slot, and a run returns once that count drains.
//!
//! ```text
//! enumerator ──▶ pending ──▶ workers ──┬──▶ completed ──▶ accounting
//!                   ▲                  ├──▶ failed    ──▶ accounting
//!                   └── redispatch ◀───┘ retry
//! ```
//!
//! # Example
//!
//! ```no_run
//! use funnel::config::UploadConfig;
//! use funnel::pipeline::Pipeline;
//! use funnel::s3::ObjectStore;
//! use funnel::upload::FileUploader;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(store: Arc<dyn ObjectStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let uploader = Arc::new(FileUploader::new(store, "my-bucket"));
//! let pipeline = Pipeline::new(UploadConfig::default(), uploader)?;
//!
//! let summary = pipeline
//!     .run(&[PathBuf::from("/var/log/app")], CancellationToken::new())
//!     .await?;
//! println!("{} completed, {} failed", summary.completed, summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod job;
pub mod retry;
mod worker;

pub use events::{EventSink, JobEvent, JobOutcome, MemorySink, TracingSink};
pub use job::{AttemptError, InFlight, UploadJob};
pub use retry::Backoff;

use crate::config::UploadConfig;
use crate::enumerate::{EnumerateError, Enumerator};
use crate::template::{CompileError, KeyTemplate};
use crate::upload::FileUploader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker::{Attempter, Routes};

/// Smallest and largest accepted worker counts
pub const MIN_CONCURRENCY: i64 = 1;
pub const MAX_CONCURRENCY: i64 = 100;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("must provide at least one path to a file or directory to upload to AWS S3")]
    NoPathsProvided,

    #[error("watching multiple paths not supported")]
    MultiPathWatchUnsupported,

    #[error("number of concurrent uploads must be within the range 1-100 (got {0})")]
    InvalidConcurrency(i64),

    #[error("failed to compile key template: {0}")]
    Template(#[from] CompileError),

    #[error(transparent)]
    Enumerate(#[from] EnumerateError),

    #[error("upload cancelled")]
    Cancelled,

    #[error("{failed} of {total} uploads failed")]
    JobsFailed { failed: usize, total: usize },
}

/// Totals for one pipeline run.
///
/// `enqueued == completed + failed` whenever a run returns normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub enqueued: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Check the worker count, returning it as a pool size
pub fn validate_concurrency(concurrency: i64) -> Result<usize, PipelineError> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
        Ok(concurrency as usize)
    } else {
        Err(PipelineError::InvalidConcurrency(concurrency))
    }
}

/// Reject requests the pipeline cannot run, before any work starts
pub fn validate_request(paths: &[PathBuf], config: &UploadConfig) -> Result<usize, PipelineError> {
    if paths.is_empty() {
        return Err(PipelineError::NoPathsProvided);
    }
    if config.watch && paths.len() > 1 {
        return Err(PipelineError::MultiPathWatchUnsupported);
    }
    validate_concurrency(config.concurrency)
}

/// Validate, build and run a pipeline in one call
pub async fn run_pipeline(
    paths: &[PathBuf],
    config: &UploadConfig,
    uploader: Arc<FileUploader>,
    cancel: CancellationToken,
) -> Result<RunSummary, PipelineError> {
    validate_request(paths, config)?;
    Pipeline::new(config.clone(), uploader)?
        .run(paths, cancel)
        .await
}

/// A configured upload pipeline.
///
/// Construction compiles the key template, so a template error is reported
/// before anything is enumerated. A pipeline can be run more than once; each
/// run starts its own pool and tears it down before returning.
pub struct Pipeline {
    config: UploadConfig,
    template: Arc<KeyTemplate>,
    uploader: Arc<FileUploader>,
    sink: Arc<dyn EventSink>,
    backoff: Backoff,
}

impl Pipeline {
    pub fn new(config: UploadConfig, uploader: Arc<FileUploader>) -> Result<Self, PipelineError> {
        validate_concurrency(config.concurrency)?;
        let template = KeyTemplate::compile(&config.key_template)?;
        let backoff = Backoff::from_config(&config.retry);

        Ok(Self {
            config,
            template: Arc::new(template),
            uploader,
            sink: Arc::new(TracingSink),
            backoff,
        })
    }

    /// Replace the default [`TracingSink`]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    /// Upload everything under `paths`.
    ///
    /// Returns once every enqueued job has completed or failed. In watch mode
    /// that only happens through `cancel`, which yields
    /// [`PipelineError::Cancelled`]. Jobs that failed permanently are counted
    /// in the summary; they only fail the run when `fail_on_job_failure` is
    /// set.
    pub async fn run(
        &self,
        paths: &[PathBuf],
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let workers = validate_request(paths, &self.config)?;
        let shutdown = cancel.child_token();

        let (pending_tx, pending_rx) = mpsc::channel::<UploadJob>(1);
        let pending_rx = Arc::new(Mutex::new(pending_rx));
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = mpsc::channel(1);
        let (failed_tx, failed_rx) = mpsc::channel(1);

        let in_flight = InFlight::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let attempter = Arc::new(Attempter {
            template: Arc::clone(&self.template),
            uploader: Arc::clone(&self.uploader),
            delete_after_upload: self.config.delete_after_upload,
            max_attempts: self.config.retry.max_attempts.max(1) as usize,
        });
        let routes = Routes {
            retry: retry_tx,
            completed: completed_tx,
            failed: failed_tx,
        };

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            tasks.spawn(worker::run_worker(
                id,
                Arc::clone(&attempter),
                Arc::clone(&pending_rx),
                routes.clone(),
                shutdown.clone(),
            ));
        }
        drop(routes);

        tasks.spawn(retry::redispatch(
            retry_rx,
            pending_tx.clone(),
            self.backoff,
            shutdown.clone(),
        ));
        tasks.spawn(worker::account(
            completed_rx,
            JobOutcome::Completed,
            Arc::clone(&self.sink),
            in_flight.clone(),
            Arc::clone(&completed),
            shutdown.clone(),
        ));
        tasks.spawn(worker::account(
            failed_rx,
            JobOutcome::Failed,
            Arc::clone(&self.sink),
            in_flight.clone(),
            Arc::clone(&failed),
            shutdown.clone(),
        ));

        info!(
            workers,
            paths = paths.len(),
            watch = self.config.watch,
            bucket = self.uploader.bucket(),
            template = self.template.source(),
            "Starting upload pipeline"
        );

        let enumerator = Enumerator::new(
            pending_tx,
            in_flight.clone(),
            self.config.poll_interval(),
            shutdown.clone(),
        );
        let enumerated = enumerator.enumerate(paths, self.config.watch).await;
        drop(enumerator);

        let outcome = match enumerated {
            Err(e) => Err(PipelineError::Enumerate(e)),
            Ok(()) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                _ = in_flight.wait_drained() => Ok(()),
            },
        };

        shutdown.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Pipeline task did not finish cleanly");
            }
        }

        let summary = RunSummary {
            enqueued: in_flight.enqueued(),
            completed: completed.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
        };

        if let Err(e) = outcome {
            info!(
                enqueued = summary.enqueued,
                completed = summary.completed,
                failed = summary.failed,
                error = %e,
                "Upload pipeline stopped"
            );
            return Err(e);
        }

        info!(
            enqueued = summary.enqueued,
            completed = summary.completed,
            failed = summary.failed,
            "Upload pipeline finished"
        );

        if self.config.fail_on_job_failure && summary.failed > 0 {
            return Err(PipelineError::JobsFailed {
                failed: summary.failed,
                total: summary.enqueued,
            });
        }

        Ok(summary)
    }
}
