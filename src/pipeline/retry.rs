//! Retry scheduling
//!
//! Failed attempts below the ceiling land on an unbounded retry queue so a
//! worker never blocks on handing a job back. A single re-dispatch task
//! holds each job for its backoff delay and then returns it to the pending
//! queue.

use super::job::UploadJob;
use crate::config::RetryConfig;
use futures::StreamExt;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::debug;

/// Exponential backoff with optional jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    /// Delay before the next attempt of a job that has failed `failures` times.
    ///
    /// `base * 2^(failures - 1)`, capped at `max`. With jitter the result is
    /// drawn uniformly from `[delay / 2, delay]`.
    pub fn delay_for(&self, failures: usize) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }

        let exponent = failures.saturating_sub(1).min(31) as u32;
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        if !self.jitter {
            return delay;
        }

        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if millis < 2 {
            return delay;
        }
        Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Move jobs from the retry queue back to the pending queue once their
/// backoff has elapsed. Runs until `shutdown` fires or both the retry queue
/// and the delay queue are exhausted.
pub(crate) async fn redispatch(
    mut retries: mpsc::UnboundedReceiver<UploadJob>,
    pending: mpsc::Sender<UploadJob>,
    backoff: Backoff,
    shutdown: CancellationToken,
) {
    let mut delayed: DelayQueue<UploadJob> = DelayQueue::new();
    let mut retries_open = true;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = retries.recv(), if retries_open => match job {
                Some(job) => {
                    let delay = backoff.delay_for(job.failures());
                    if delay.is_zero() {
                        if !send_pending(&pending, job, &shutdown).await {
                            break;
                        }
                    } else {
                        debug!(
                            filename = %job.path().display(),
                            delay_ms = delay.as_millis() as u64,
                            "Delaying retry"
                        );
                        delayed.insert(job, delay);
                    }
                }
                None => retries_open = false,
            },
            Some(expired) = delayed.next(), if !delayed.is_empty() => {
                if !send_pending(&pending, expired.into_inner(), &shutdown).await {
                    break;
                }
            }
            else => break,
        }
    }

    debug!(dropped = delayed.len(), "Retry dispatcher stopped");
}

async fn send_pending(
    pending: &mpsc::Sender<UploadJob>,
    job: UploadJob,
    shutdown: &CancellationToken,
) -> bool {
    debug!(
        filename = %job.path().display(),
        attempt = job.failures() + 1,
        "Re-dispatching upload"
    );
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        sent = pending.send(job) => sent.is_ok(),
    }
}
