//! Feedback Loop Service
//!
//! Evaluates every terminal stage record against a bounded rule table and
//! decides whether the engine should continue, rewind an earlier stage with
//! adjusted input, or abort. Evaluation is side-effect-free with respect to
//! job state: the engine owns all mutation. Performance Monitoring is
//! consulted read-only so rewinds are not steered into degraded providers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{FeedbackDecision, Job, Layer, StageRecord, StageStatus};
use crate::monitor::PerformanceMonitor;
use crate::storage::Storage;

/// Policy contract for stage-completion evaluation.
pub trait FeedbackPolicy: Send + Sync {
    /// Evaluate a terminal stage record in the context of its job.
    fn evaluate(&self, record: &StageRecord, job: &Job) -> FeedbackDecision;
}

/// What makes a rule fire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RuleTrigger {
    /// A numeric field in the stage output fell below a threshold
    ScoreBelow { field: String, threshold: f64 },
    /// The stage attempt failed (retries already exhausted)
    StageFailed,
}

/// One entry in the feedback rule table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRule {
    /// Rule name, used in audit reasons
    pub name: String,
    /// Layer whose stages this rule watches
    pub layer: Layer,
    /// Firing condition
    pub trigger: RuleTrigger,
    /// Plan index of the stage to re-run
    pub rewind_to: usize,
    /// Optional payload override merged into the rewound stage's input
    #[serde(default)]
    pub adjusted_input: Option<Value>,
}

impl FeedbackRule {
    fn fires(&self, record: &StageRecord) -> bool {
        if record.layer != self.layer {
            return false;
        }

        match &self.trigger {
            RuleTrigger::ScoreBelow { field, threshold } => {
                record.status == StageStatus::Succeeded
                    && record
                        .output
                        .as_ref()
                        .and_then(|output| output.get(field))
                        .and_then(Value::as_f64)
                        .map(|score| score < *threshold)
                        .unwrap_or(false)
            }
            RuleTrigger::StageFailed => record.status == StageStatus::Failed,
        }
    }
}

/// Rule-table policy with a degraded-provider circuit breaker
pub struct RuleBasedPolicy<S: Storage> {
    rules: Vec<FeedbackRule>,
    monitor: Arc<PerformanceMonitor<S>>,
}

impl<S: Storage> RuleBasedPolicy<S> {
    /// Create a policy from a rule table.
    pub fn new(rules: Vec<FeedbackRule>, monitor: Arc<PerformanceMonitor<S>>) -> Self {
        Self { rules, monitor }
    }
}

impl<S: Storage> FeedbackPolicy for RuleBasedPolicy<S> {
    fn evaluate(&self, record: &StageRecord, job: &Job) -> FeedbackDecision {
        for rule in &self.rules {
            if !rule.fires(record) {
                continue;
            }

            // Rewinding never skips forward
            if rule.rewind_to >= record.stage_index {
                tracing::warn!(
                    rule = %rule.name,
                    rewind_to = rule.rewind_to,
                    stage_index = record.stage_index,
                    "Feedback rule targets a non-earlier stage, ignoring"
                );
                continue;
            }

            let target = match job.plan.get(rule.rewind_to) {
                Some(target) => target,
                None => continue,
            };

            // Circuit breaker: do not steer work into a degraded provider
            if self.monitor.is_degraded(&target.provider_ref) {
                tracing::info!(
                    rule = %rule.name,
                    provider_ref = %target.provider_ref,
                    "Rewind target provider degraded, continuing instead"
                );
                return FeedbackDecision {
                    action: crate::domain::FeedbackAction::Continue,
                    reason: format!(
                        "rule '{}' suppressed: provider '{}' degraded",
                        rule.name, target.provider_ref
                    ),
                    adjusted_input: None,
                };
            }

            return FeedbackDecision::rewind(
                rule.rewind_to,
                format!("rule '{}' triggered on {} stage", rule.name, record.layer),
                rule.adjusted_input.clone(),
            );
        }

        FeedbackDecision::advance()
    }
}

/// Policy that never intervenes; useful as a default and in tests.
pub struct AlwaysContinue;

impl FeedbackPolicy for AlwaysContinue {
    fn evaluate(&self, _record: &StageRecord, _job: &Job) -> FeedbackDecision {
        FeedbackDecision::advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedbackAction, PlannedStage, StageError};
    use crate::id::now_ms;
    use crate::monitor::{MonitorConfig, StageSample};
    use crate::storage::JsonlStorage;
    use serde_json::json;

    fn three_stage_job() -> Job {
        Job::new(
            json!({"topic": "rust"}),
            vec![
                PlannedStage {
                    name: "validate".to_string(),
                    layer: Layer::Bottom,
                    provider_ref: "structural-validator".to_string(),
                },
                PlannedStage {
                    name: "structure".to_string(),
                    layer: Layer::Middle,
                    provider_ref: "semantic-structurer".to_string(),
                },
                PlannedStage {
                    name: "enrich".to_string(),
                    layer: Layer::Top,
                    provider_ref: "authority-enricher".to_string(),
                },
            ],
            3,
        )
    }

    fn trust_rule() -> FeedbackRule {
        FeedbackRule {
            name: "low-trust-restructure".to_string(),
            layer: Layer::Top,
            trigger: RuleTrigger::ScoreBelow {
                field: "trust_score".to_string(),
                threshold: 0.6,
            },
            rewind_to: 1,
            adjusted_input: Some(json!({"strategy": "conservative"})),
        }
    }

    fn monitor() -> Arc<PerformanceMonitor<JsonlStorage>> {
        Arc::new(PerformanceMonitor::new(MonitorConfig::default()))
    }

    #[test]
    fn test_low_score_triggers_rewind() {
        let policy = RuleBasedPolicy::new(vec![trust_rule()], monitor());
        let job = three_stage_job();

        let mut record = StageRecord::begin(2, Layer::Top, "authority-enricher", 1);
        record.succeed(json!({"trust_score": 0.4}));

        let decision = policy.evaluate(&record, &job);
        assert_eq!(decision.action, FeedbackAction::Rewind(1));
        assert_eq!(
            decision.adjusted_input,
            Some(json!({"strategy": "conservative"}))
        );
        assert!(decision.reason.contains("low-trust-restructure"));
    }

    #[test]
    fn test_healthy_score_continues() {
        let policy = RuleBasedPolicy::new(vec![trust_rule()], monitor());
        let job = three_stage_job();

        let mut record = StageRecord::begin(2, Layer::Top, "authority-enricher", 1);
        record.succeed(json!({"trust_score": 0.9}));

        let decision = policy.evaluate(&record, &job);
        assert_eq!(decision.action, FeedbackAction::Continue);
    }

    #[test]
    fn test_missing_score_field_continues() {
        let policy = RuleBasedPolicy::new(vec![trust_rule()], monitor());
        let job = three_stage_job();

        let mut record = StageRecord::begin(2, Layer::Top, "authority-enricher", 1);
        record.succeed(json!({"schema": {}}));

        assert_eq!(policy.evaluate(&record, &job).action, FeedbackAction::Continue);
    }

    #[test]
    fn test_rule_only_watches_its_layer() {
        let policy = RuleBasedPolicy::new(vec![trust_rule()], monitor());
        let job = three_stage_job();

        let mut record = StageRecord::begin(1, Layer::Middle, "semantic-structurer", 1);
        record.succeed(json!({"trust_score": 0.1}));

        assert_eq!(policy.evaluate(&record, &job).action, FeedbackAction::Continue);
    }

    #[test]
    fn test_stage_failed_trigger() {
        let rule = FeedbackRule {
            name: "retry-validation-elsewhere".to_string(),
            layer: Layer::Middle,
            trigger: RuleTrigger::StageFailed,
            rewind_to: 0,
            adjusted_input: None,
        };
        let policy = RuleBasedPolicy::new(vec![rule], monitor());
        let job = three_stage_job();

        let mut record = StageRecord::begin(1, Layer::Middle, "semantic-structurer", 3);
        record.fail(StageError::new("ProviderFailed", "exhausted retries"));

        assert_eq!(policy.evaluate(&record, &job).action, FeedbackAction::Rewind(0));
    }

    #[test]
    fn test_forward_rewind_is_ignored() {
        let rule = FeedbackRule {
            rewind_to: 2,
            ..trust_rule()
        };
        let policy = RuleBasedPolicy::new(vec![rule], monitor());
        let job = three_stage_job();

        let mut record = StageRecord::begin(2, Layer::Top, "authority-enricher", 1);
        record.succeed(json!({"trust_score": 0.1}));

        assert_eq!(policy.evaluate(&record, &job).action, FeedbackAction::Continue);
    }

    #[test]
    fn test_degraded_target_suppresses_rewind() {
        let monitor = monitor();
        // Enough recent failures to trip the circuit breaker
        for _ in 0..4 {
            monitor.record(StageSample {
                provider_ref: "semantic-structurer".to_string(),
                layer: Layer::Middle,
                duration_ms: 100,
                success: false,
                recorded_at: now_ms(),
            });
        }

        let policy = RuleBasedPolicy::new(vec![trust_rule()], monitor);
        let job = three_stage_job();

        let mut record = StageRecord::begin(2, Layer::Top, "authority-enricher", 1);
        record.succeed(json!({"trust_score": 0.1}));

        let decision = policy.evaluate(&record, &job);
        assert_eq!(decision.action, FeedbackAction::Continue);
        assert!(decision.reason.contains("degraded"));
    }

    #[test]
    fn test_always_continue() {
        let job = three_stage_job();
        let mut record = StageRecord::begin(0, Layer::Bottom, "structural-validator", 1);
        record.succeed(json!({}));

        let decision = AlwaysContinue.evaluate(&record, &job);
        assert_eq!(decision.action, FeedbackAction::Continue);
    }
}
