//! Path enumeration
//!
//! Turns the user's paths into upload jobs on the pending queue. Files are
//! emitted as-is; directories are walked recursively in file-name order.
//! In watch mode a single path is re-scanned on every poll interval until
//! the run is cancelled.

use crate::pipeline::job::{InFlight, UploadJob};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// Enumeration errors
#[derive(Error, Debug)]
pub enum EnumerateError {
    #[error("failed to stat path: {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk directory: {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("watching multiple paths not supported")]
    WatchMultiplePaths,

    #[error("pending queue closed while enumerating")]
    QueueClosed,

    #[error("directory walk task failed: {0}")]
    Join(String),
}

/// Whether enumeration should carry on after an emit
enum Flow {
    Continue,
    Stop,
}

/// Produces upload jobs for a set of paths.
///
/// Every job is counted in the [`InFlight`] tracker before it is handed to
/// the pending queue, so the pipeline cannot observe a drained count while a
/// job is on its way in.
#[derive(Clone)]
pub struct Enumerator {
    pending: mpsc::Sender<UploadJob>,
    in_flight: InFlight,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Enumerator {
    pub fn new(
        pending: mpsc::Sender<UploadJob>,
        in_flight: InFlight,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pending,
            in_flight,
            poll_interval,
            cancel,
        }
    }

    /// Enumerate `paths`, returning once everything has been enqueued.
    ///
    /// With `watch` set this only returns on cancellation or error.
    /// Cancellation is not an error here: the caller owns the token and
    /// decides what it means.
    pub async fn enumerate(&self, paths: &[PathBuf], watch: bool) -> Result<(), EnumerateError> {
        match paths {
            [] => Ok(()),
            [path] => self.enumerate_one(path, watch).await,
            _ if watch => Err(EnumerateError::WatchMultiplePaths),
            _ => {
                for path in paths {
                    if let Flow::Stop = self.enumerate_path(path).await? {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    async fn enumerate_one(&self, path: &Path, watch: bool) -> Result<(), EnumerateError> {
        if !watch {
            self.enumerate_path(path).await?;
            return Ok(());
        }

        info!(path = %path.display(), interval_ms = self.poll_interval.as_millis() as u64, "Watching path for files");

        loop {
            if let Flow::Stop = self.enumerate_path(path).await? {
                return Ok(());
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One pass over a single path
    async fn enumerate_path(&self, path: &Path) -> Result<Flow, EnumerateError> {
        let meta = tokio::fs::metadata(path).await.map_err(|source| {
            error!(path = %path.display(), error = %source, "Failed to stat path");
            EnumerateError::Stat {
                path: path.to_path_buf(),
                source,
            }
        })?;

        if meta.is_dir() {
            self.walk_dir(path).await
        } else {
            self.emit(path.to_path_buf()).await
        }
    }

    async fn emit(&self, path: PathBuf) -> Result<Flow, EnumerateError> {
        if self.cancel.is_cancelled() {
            return Ok(Flow::Stop);
        }

        debug!(filename = %path.display(), "Enqueuing file");
        self.in_flight.add();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(Flow::Stop),
            sent = self.pending.send(UploadJob::new(path)) => match sent {
                Ok(()) => Ok(Flow::Continue),
                Err(_) => Err(EnumerateError::QueueClosed),
            },
        }
    }

    async fn walk_dir(&self, root: &Path) -> Result<Flow, EnumerateError> {
        let this = self.clone();
        let root = root.to_path_buf();
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || this.walk_blocking(&handle, &root))
            .await
            .map_err(|e| EnumerateError::Join(e.to_string()))?
    }

    /// Walk a directory tree on a blocking thread, pushing each file onto the
    /// pending queue as it is found. Entries that vanish mid-walk are skipped.
    ///
    /// Each send goes through [`Self::emit`] on `handle`, so a walk parked on
    /// a full queue still wakes up when the run is cancelled.
    fn walk_blocking(&self, handle: &Handle, root: &Path) -> Result<Flow, EnumerateError> {
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Stop);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.io_error().map(|e| e.kind()) == Some(ErrorKind::NotFound) => {
                    debug!(
                        path = ?err.path(),
                        error = %err,
                        "Skipping entry that disappeared during walk"
                    );
                    continue;
                }
                Err(source) => {
                    error!(path = %root.display(), error = %source, "Failed to walk directory");
                    return Err(EnumerateError::Walk {
                        path: root.to_path_buf(),
                        source,
                    });
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            if let Flow::Stop = handle.block_on(self.emit(entry.into_path()))? {
                return Ok(Flow::Stop);
            }
        }

        Ok(Flow::Continue)
    }
}
