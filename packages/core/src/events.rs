//! Event types broadcast to observers while jobs run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GeneratedImage, JobId, JobStatus};

/// Lifecycle and progress events for a single job.
///
/// Serialized with a `type` discriminator (`job:started`, `job:progress`,
/// `job:completed`, `job:failed`) so transports can forward them verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// The worker picked the job up.
    #[serde(rename = "job:started")]
    JobStarted {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// One generation step finished.
    #[serde(rename = "job:progress")]
    JobProgress {
        job_id: JobId,
        step: u32,
        total_steps: u32,
        percentage: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview_image: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The job reached `completed`, or `cancelled` after it had started.
    #[serde(rename = "job:completed")]
    JobCompleted {
        job_id: JobId,
        status: JobStatus,
        images: Vec<GeneratedImage>,
        elapsed_seconds: f64,
        timestamp: DateTime<Utc>,
    },
    /// The backend or the store raised an error.
    #[serde(rename = "job:failed")]
    JobFailed {
        job_id: JobId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn started(job_id: JobId) -> Self {
        JobEvent::JobStarted {
            job_id,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        JobEvent::JobFailed {
            job_id,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the job ID this event belongs to.
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobProgress { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. } => job_id,
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobStarted { timestamp, .. }
            | JobEvent::JobProgress { timestamp, .. }
            | JobEvent::JobCompleted { timestamp, .. }
            | JobEvent::JobFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::JobStarted { .. } => "job:started",
            JobEvent::JobProgress { .. } => "job:progress",
            JobEvent::JobCompleted { .. } => "job:completed",
            JobEvent::JobFailed { .. } => "job:failed",
        }
    }

    /// Whether this is the last event published for its job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::JobCompleted { .. } | JobEvent::JobFailed { .. }
        )
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobStarted { job_id, .. } => format!("Job {} started", job_id),
            JobEvent::JobProgress {
                job_id,
                step,
                total_steps,
                percentage,
                ..
            } => format!("Job {} step {}/{} ({}%)", job_id, step, total_steps, percentage),
            JobEvent::JobCompleted {
                job_id,
                status,
                images,
                elapsed_seconds,
                ..
            } => format!(
                "Job {} {} with {} image(s) in {}s",
                job_id,
                status,
                images.len(),
                elapsed_seconds
            ),
            JobEvent::JobFailed { job_id, error, .. } => {
                format!("Job {} failed: {}", job_id, error)
            }
        }
    }
}
