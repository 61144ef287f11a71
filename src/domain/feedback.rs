//! Feedback decision types
//!
//! A FeedbackDecision is the output of evaluating a completed stage. It is
//! pure data: all job mutation based on a decision happens in the Workflow
//! Engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the orchestrator should do after a completed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "stage")]
pub enum FeedbackAction {
    /// Advance to the next stage (or finish)
    Continue,
    /// Re-execute an earlier stage; the index must precede the current stage
    Rewind(usize),
    /// Stop the job as Failed
    Abort,
}

/// Output of the Feedback Loop Service's evaluation of a completed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackDecision {
    /// Decided action
    pub action: FeedbackAction,
    /// Human-readable justification, retained for audit
    pub reason: String,
    /// Optional payload override for the rewound stage
    pub adjusted_input: Option<Value>,
}

impl FeedbackDecision {
    /// Plain continue, no opinion recorded.
    pub fn advance() -> Self {
        Self {
            action: FeedbackAction::Continue,
            reason: String::new(),
            adjusted_input: None,
        }
    }

    /// Rewind to an earlier stage with an optional input override.
    pub fn rewind(stage_index: usize, reason: impl Into<String>, adjusted_input: Option<Value>) -> Self {
        Self {
            action: FeedbackAction::Rewind(stage_index),
            reason: reason.into(),
            adjusted_input,
        }
    }

    /// Abort the job.
    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            action: FeedbackAction::Abort,
            reason: reason.into(),
            adjusted_input: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_advance_has_no_override() {
        let decision = FeedbackDecision::advance();
        assert_eq!(decision.action, FeedbackAction::Continue);
        assert!(decision.adjusted_input.is_none());
    }

    #[test]
    fn test_rewind_carries_stage_and_override() {
        let decision = FeedbackDecision::rewind(
            1,
            "trust score below threshold",
            Some(json!({"strategy": "conservative"})),
        );
        assert_eq!(decision.action, FeedbackAction::Rewind(1));
        assert_eq!(decision.reason, "trust score below threshold");
        assert_eq!(
            decision.adjusted_input,
            Some(json!({"strategy": "conservative"}))
        );
    }

    #[test]
    fn test_abort_reason() {
        let decision = FeedbackDecision::abort("unrecoverable contract violation");
        assert_eq!(decision.action, FeedbackAction::Abort);
        assert!(decision.reason.contains("unrecoverable"));
    }

    #[test]
    fn test_action_serialization_roundtrip() {
        let decision = FeedbackDecision::rewind(2, "r", None);
        let json = serde_json::to_string(&decision).unwrap();
        let parsed: FeedbackDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decision);
    }
}
