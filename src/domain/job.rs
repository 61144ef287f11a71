//! Job record and related types
//!
//! The Job is the unit of orchestration work: one content-generation request
//! driven through an ordered stage plan. The Workflow Engine is the only
//! component that mutates a Job's stages once the job is running.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::stage::{Layer, StageRecord, StageStatus};
use crate::id::{generate_job_id, now_ms};
use crate::storage::HasId;

/// Status of a job's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, no driver attached yet
    Pending,
    /// A drive loop is advancing stages
    Running,
    /// Feedback evaluation in progress for the last completed stage
    AwaitingFeedback,
    /// All planned stages completed, result aggregated
    Succeeded,
    /// Stage failure, abort decision, or budget exhaustion
    Failed,
    /// Cancellation observed at a checkpoint
    Cancelled,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Caller-facing failure surface: stable code plus human-readable reason.
///
/// Raw provider detail never lands here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub reason: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// One entry in a job's stage plan: which layer and provider to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStage {
    /// Stage name for logs and events
    pub name: String,
    /// Pipeline layer this stage belongs to
    pub layer: Layer,
    /// Capability Provider invoked for this stage
    pub provider_ref: String,
}

/// The core Job struct representing one orchestrated request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    //=== Identity ===
    /// Unique identifier ("job-1738300800123-a1b2"), immutable
    pub id: String,

    //=== Plan ===
    /// Ordered stage plan built from the configured topology at creation
    pub plan: Vec<PlannedStage>,

    /// Pointer into `plan`; equal to `plan.len()` when complete
    pub current_stage: usize,

    //=== Runtime State ===
    /// Current status
    pub status: JobStatus,

    /// Append-only history of stage attempts
    pub stages: Vec<StageRecord>,

    /// Remaining allowed feedback rewinds
    pub iteration_budget: u32,

    /// Cooperative cancellation flag, applied by the engine at checkpoints
    pub cancel_requested: bool,

    //=== Payloads ===
    /// Original request payload, immutable after creation
    pub input: Value,

    /// Final aggregated output, present only when status is Succeeded
    pub result: Option<Value>,

    /// Failure surface, absent for Cancelled jobs
    pub last_error: Option<JobError>,

    //=== Timestamps ===
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// Create a new job from a validated input payload and a stage plan
    pub fn new(input: Value, plan: Vec<PlannedStage>, iteration_budget: u32) -> Self {
        let now = now_ms();
        Self {
            id: generate_job_id(),
            plan,
            current_stage: 0,
            status: JobStatus::Pending,
            stages: Vec::new(),
            iteration_budget,
            cancel_requested: false,
            input,
            result: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the timestamp
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// The most recent attempt record for a given plan stage, if any.
    pub fn latest_attempt(&self, stage_index: usize) -> Option<&StageRecord> {
        self.stages
            .iter()
            .rev()
            .find(|record| record.stage_index == stage_index)
    }

    /// The most recent successful output for a given plan stage, if any.
    pub fn latest_output(&self, stage_index: usize) -> Option<&Value> {
        self.stages
            .iter()
            .rev()
            .find(|record| {
                record.stage_index == stage_index && record.status == StageStatus::Succeeded
            })
            .and_then(|record| record.output.as_ref())
    }

    /// True when every plan stage's latest attempt succeeded.
    pub fn plan_satisfied(&self) -> bool {
        (0..self.plan.len()).all(|index| {
            self.latest_attempt(index)
                .map(|record| record.status == StageStatus::Succeeded)
                .unwrap_or(false)
        })
    }
}

impl HasId for Job {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Filter for listing jobs by status and time range.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs with this status
    pub status: Option<JobStatus>,
    /// Only jobs created at or after this time (unix ms)
    pub created_after: Option<i64>,
    /// Only jobs created before this time (unix ms)
    pub created_before: Option<i64>,
}
