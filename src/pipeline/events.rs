//! Reported job events
//!
//! Every job that reaches a terminal queue produces exactly one [`JobEvent`],
//! handed to the pipeline's [`EventSink`].

use super::job::UploadJob;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// Terminal state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Completed,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
        }
    }
}

/// Record of one job's trip through the pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub path: String,
    pub key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_nanoseconds: u64,
    pub outcome: JobOutcome,
    /// Every attempt error, oldest first. A completed job may carry errors
    /// from attempts that failed before it succeeded.
    pub errors: Vec<String>,
}

impl JobEvent {
    pub fn from_job(job: &UploadJob, outcome: JobOutcome) -> Self {
        let elapsed = job.elapsed();
        Self {
            path: job.path().display().to_string(),
            key: job.key().map(str::to_string),
            started_at: job.started_at(),
            ended_at: Utc::now(),
            duration_nanoseconds: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            outcome,
            errors: job.attempt_errors().iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanoseconds)
    }
}

/// Receiver of job events.
///
/// Called from the accounting tasks, once per terminal job. Implementations
/// must not block for long: the completed and failed queues do not move
/// while a sink is running.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &JobEvent);
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &JobEvent) {
        let errors = serde_json::to_string(&event.errors).unwrap_or_default();
        let key = event.key.as_deref().unwrap_or_default();

        match event.outcome {
            JobOutcome::Completed => info!(
                filename = %event.path,
                key,
                startedAt = %event.started_at.to_rfc3339(),
                endedAt = %event.ended_at.to_rfc3339(),
                durationPretty = ?event.duration(),
                durationNanoseconds = event.duration_nanoseconds,
                errors = %errors,
                "Uploaded file"
            ),
            JobOutcome::Failed => error!(
                filename = %event.path,
                key,
                startedAt = %event.started_at.to_rfc3339(),
                endedAt = %event.ended_at.to_rfc3339(),
                durationPretty = ?event.duration(),
                durationNanoseconds = event.duration_nanoseconds,
                errors = %errors,
                "Failed to upload file"
            ),
        }
    }
}

/// Keeps every event in memory, for embedding callers that want the full
/// report after a run
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<JobEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().clone()
    }

    pub fn with_outcome(&self, outcome: JobOutcome) -> Vec<JobEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.outcome == outcome)
            .cloned()
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &JobEvent) {
        self.events.lock().push(event.clone());
    }
}
