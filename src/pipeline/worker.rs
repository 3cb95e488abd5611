//! Upload workers and terminal-queue consumers

use super::events::{EventSink, JobEvent, JobOutcome};
use super::job::{AttemptError, InFlight, UploadJob};
use crate::metrics;
use crate::template::KeyTemplate;
use crate::upload::FileUploader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a worker needs to attempt a job, shared by the whole pool
pub(crate) struct Attempter {
    pub(crate) template: Arc<KeyTemplate>,
    pub(crate) uploader: Arc<FileUploader>,
    pub(crate) delete_after_upload: bool,
    pub(crate) max_attempts: usize,
}

impl Attempter {
    /// Render, upload, and optionally delete. Any failure fails the attempt.
    async fn attempt(&self, job: &mut UploadJob) -> Result<(), AttemptError> {
        let key = self.template.key_for_file(job.path()).await?;
        job.set_key(key.clone());

        self.uploader.upload(job.path(), &key).await?;

        if self.delete_after_upload {
            self.uploader
                .remove_local_file(job.path())
                .await
                .map_err(AttemptError::Delete)?;
        }

        Ok(())
    }
}

/// Output queues of a worker
#[derive(Clone)]
pub(crate) struct Routes {
    pub(crate) retry: mpsc::UnboundedSender<UploadJob>,
    pub(crate) completed: mpsc::Sender<UploadJob>,
    pub(crate) failed: mpsc::Sender<UploadJob>,
}

/// Take jobs off the shared pending queue until shutdown.
///
/// Each job is routed to exactly one of completed, retry or failed.
pub(crate) async fn run_worker(
    id: usize,
    attempter: Arc<Attempter>,
    pending: Arc<Mutex<mpsc::Receiver<UploadJob>>>,
    routes: Routes,
    shutdown: CancellationToken,
) {
    debug!(worker = id, "Upload worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            job = async { pending.lock().await.recv().await } => job,
        };
        let Some(mut job) = next else { break };

        let routed = match attempter.attempt(&mut job).await {
            Ok(()) => {
                debug!(
                    worker = id,
                    filename = %job.path().display(),
                    key = job.key().unwrap_or_default(),
                    "Upload attempt succeeded"
                );
                forward(&routes.completed, job, &shutdown).await
            }
            Err(err) => {
                metrics::record_attempt_failed(err.kind());
                let retryable = err.is_retryable();
                warn!(
                    worker = id,
                    filename = %job.path().display(),
                    attempt = job.failures() + 1,
                    error = %err,
                    "Upload attempt failed"
                );
                job.record_failure(err);

                if retryable && job.failures() < attempter.max_attempts {
                    metrics::record_retry_scheduled();
                    routes.retry.send(job).is_ok()
                } else {
                    forward(&routes.failed, job, &shutdown).await
                }
            }
        };

        if !routed {
            break;
        }
    }

    debug!(worker = id, "Upload worker stopped");
}

async fn forward(
    queue: &mpsc::Sender<UploadJob>,
    job: UploadJob,
    shutdown: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        sent = queue.send(job) => sent.is_ok(),
    }
}

/// Drain one terminal queue: report each job, count it and release its
/// in-flight slot.
pub(crate) async fn account(
    mut queue: mpsc::Receiver<UploadJob>,
    outcome: JobOutcome,
    sink: Arc<dyn EventSink>,
    in_flight: InFlight,
    counter: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let event = JobEvent::from_job(&job, outcome);
        metrics::record_job_finished(outcome.as_str(), event.duration().as_secs_f64());
        sink.record(&event);

        counter.fetch_add(1, Ordering::SeqCst);
        in_flight.done();
    }
}
