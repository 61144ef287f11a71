//! Stage records and related types
//!
//! A StageRecord captures one attempt at one pipeline stage. Records are
//! append-only: a re-run caused by retries or a feedback rewind appends a new
//! record, preserving the full execution history of the job.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::now_ms;

/// The three conceptual pipeline layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Structural / technical validation
    Bottom,
    /// Structuring and semantic optimization
    Middle,
    /// Authority / trust-signal enrichment and schema generation
    Top,
}

impl Layer {
    /// Get a human-readable name for the layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Bottom => "bottom",
            Layer::Middle => "middle",
            Layer::Top => "top",
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a single stage attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Created, provider not yet invoked
    Pending,
    /// Provider call in flight
    Running,
    /// Provider returned output
    Succeeded,
    /// Provider error or retry exhaustion
    Failed,
}

impl StageStatus {
    /// Returns true if the stage attempt is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed)
    }
}

/// Structured failure reason recorded on a failed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Stable error code ("ProviderFailed", "Timeout", "IncompatibleSchema")
    pub code: String,
    /// Human-readable reason, retained for audit
    pub reason: String,
}

impl StageError {
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// One attempt at one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Index into the job's stage plan
    pub stage_index: usize,

    /// Which pipeline layer this stage belongs to
    pub layer: Layer,

    /// Identifier of the Capability Provider invoked
    pub provider_ref: String,

    /// 1-based retry counter within this stage
    pub attempt: u32,

    /// Current status
    pub status: StageStatus,

    /// Provider result, present only on success
    pub output: Option<Value>,

    /// Structured failure reason, present only on failure
    pub error: Option<StageError>,

    //=== Timestamps ===
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl StageRecord {
    /// Create a new record for a stage about to be invoked
    pub fn begin(stage_index: usize, layer: Layer, provider_ref: &str, attempt: u32) -> Self {
        Self {
            stage_index,
            layer,
            provider_ref: provider_ref.to_string(),
            attempt,
            status: StageStatus::Running,
            output: None,
            error: None,
            started_at: now_ms(),
            finished_at: None,
        }
    }

    /// Mark the attempt succeeded with the provider output.
    ///
    /// Terminal status is set exactly once; callers never touch a record
    /// after this.
    pub fn succeed(&mut self, output: Value) {
        debug_assert!(!self.status.is_terminal());
        self.status = StageStatus::Succeeded;
        self.output = Some(output);
        self.finished_at = Some(now_ms());
    }

    /// Mark the attempt failed with a structured reason.
    pub fn fail(&mut self, error: StageError) {
        debug_assert!(!self.status.is_terminal());
        self.status = StageStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now_ms());
    }

    /// Wall-clock duration of the attempt in milliseconds, if finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }
}
