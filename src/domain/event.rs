//! Stage event wire types for realtime updates.

use serde::{Deserialize, Serialize};

use crate::domain::stage::{Layer, StageRecord, StageStatus};
use crate::domain::{Job, JobStatus};
use crate::id::now_ms;

/// Event kind constants
pub mod event_kinds {
    pub const JOB_CREATED: &str = "job.created";
    pub const JOB_STARTED: &str = "job.started";
    pub const STAGE_STARTED: &str = "stage.started";
    pub const STAGE_COMPLETE: &str = "stage.complete";
    pub const STAGE_REWOUND: &str = "stage.rewound";
    pub const JOB_SUCCEEDED: &str = "job.succeeded";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_CANCELLED: &str = "job.cancelled";
}

/// One job-state-change event delivered to subscribers.
///
/// Wire shape: `{jobId, stageIndex, layer, status, timestamp, summary?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEvent {
    /// Event kind (e.g. "stage.complete", "job.failed")
    pub kind: String,
    /// Job this event belongs to
    pub job_id: String,
    /// Index into the job's stage plan, if stage-scoped
    pub stage_index: Option<usize>,
    /// Layer of the stage, if stage-scoped
    pub layer: Option<Layer>,
    /// Stage or job status at the time of the event
    pub status: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Optional human-readable summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl StageEvent {
    fn new(kind: &str, job_id: &str, status: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            job_id: job_id.to_string(),
            stage_index: None,
            layer: None,
            status: status.into(),
            timestamp: now_ms(),
            summary: None,
        }
    }

    fn job_status_str(status: JobStatus) -> String {
        serde_json::to_value(status)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Create a job.created event
    pub fn job_created(job: &Job) -> Self {
        Self::new(event_kinds::JOB_CREATED, &job.id, Self::job_status_str(job.status))
    }

    /// Create a job.started event
    pub fn job_started(job_id: &str) -> Self {
        Self::new(
            event_kinds::JOB_STARTED,
            job_id,
            Self::job_status_str(JobStatus::Running),
        )
    }

    /// Create a stage.started event
    pub fn stage_started(job_id: &str, record: &StageRecord) -> Self {
        let mut event = Self::new(event_kinds::STAGE_STARTED, job_id, "running");
        event.stage_index = Some(record.stage_index);
        event.layer = Some(record.layer);
        event.summary = Some(format!(
            "{} attempt {} via {}",
            record.layer, record.attempt, record.provider_ref
        ));
        event
    }

    /// Create a stage.complete event from a terminal stage record
    pub fn stage_complete(job_id: &str, record: &StageRecord) -> Self {
        let status = match record.status {
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
        };
        let mut event = Self::new(event_kinds::STAGE_COMPLETE, job_id, status);
        event.stage_index = Some(record.stage_index);
        event.layer = Some(record.layer);
        event.summary = record
            .error
            .as_ref()
            .map(|error| format!("{}: {}", error.code, error.reason));
        event
    }

    /// Create a stage.rewound event
    pub fn stage_rewound(job_id: &str, target_stage: usize, reason: &str) -> Self {
        let mut event = Self::new(event_kinds::STAGE_REWOUND, job_id, "running");
        event.stage_index = Some(target_stage);
        event.summary = Some(reason.to_string());
        event
    }

    /// Create the terminal event for a finished job
    pub fn job_terminal(job: &Job) -> Self {
        let kind = match job.status {
            JobStatus::Succeeded => event_kinds::JOB_SUCCEEDED,
            JobStatus::Cancelled => event_kinds::JOB_CANCELLED,
            _ => event_kinds::JOB_FAILED,
        };
        let mut event = Self::new(kind, &job.id, Self::job_status_str(job.status));
        event.summary = job
            .last_error
            .as_ref()
            .map(|error| format!("{}: {}", error.code, error.reason));
        event
    }

    /// True for events that close out a job's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind.as_str(),
            event_kinds::JOB_SUCCEEDED | event_kinds::JOB_FAILED | event_kinds::JOB_CANCELLED
        )
    }
}
