//! Upload jobs and in-flight accounting

use crate::metrics;
use crate::template::RenderError;
use crate::upload::UploadError;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// Error from a single upload attempt
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The object was stored but the local file could not be removed
    #[error(transparent)]
    Delete(UploadError),
}

impl AttemptError {
    /// Whether the job may be attempted again. A delete failure follows a
    /// confirmed upload and is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Delete(_))
    }

    /// Metric label for the stage that failed
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Render(_) => "render",
            AttemptError::Upload(_) => "upload",
            AttemptError::Delete(_) => "delete",
        }
    }
}

/// One file's trip through the pipeline, including its retry history.
///
/// A job is owned by exactly one queue or worker at a time; it moves between
/// them by value and is never cloned.
#[derive(Debug)]
pub struct UploadJob {
    path: PathBuf,
    key: Option<String>,
    attempt_errors: Vec<AttemptError>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl UploadJob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
            attempt_errors: Vec::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key rendered on the most recent attempt
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Errors from every failed attempt, oldest first
    pub fn attempt_errors(&self) -> &[AttemptError] {
        &self.attempt_errors
    }

    /// Number of failed attempts so far
    pub fn failures(&self) -> usize {
        self.attempt_errors.len()
    }

    /// Wall-clock time the job was first enqueued
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn set_key(&mut self, key: String) {
        self.key = Some(key);
    }

    pub(crate) fn record_failure(&mut self, error: AttemptError) {
        self.attempt_errors.push(error);
    }
}

/// Counts jobs that have been enqueued but not yet reached a terminal queue.
///
/// Producers call [`InFlight::add`] before handing a job to the pending
/// queue; the accounting consumers call [`InFlight::done`] once per terminal
/// job. Retries do not touch the count.
#[derive(Debug, Clone)]
pub struct InFlight {
    count: Arc<watch::Sender<usize>>,
    enqueued: Arc<AtomicUsize>,
}

impl InFlight {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
            enqueued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add(&self) {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        self.count.send_modify(|n| *n += 1);
        metrics::IN_FLIGHT_JOBS.inc();
    }

    pub fn done(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
        metrics::IN_FLIGHT_JOBS.dec();
    }

    /// Jobs currently between enqueue and a terminal queue
    pub fn current(&self) -> usize {
        *self.count.borrow()
    }

    /// Jobs ever enqueued
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued job has reached a terminal queue
    pub async fn wait_drained(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}
