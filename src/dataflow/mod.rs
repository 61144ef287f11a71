//! Cross-Layer Data Flow Service
//!
//! Translates stage N output into stage N+1 input according to declared
//! field mappings, merges feedback overrides into rewound stage inputs
//! (override wins), and aggregates the final job result from the stage
//! outputs deterministically.

pub mod mapping;

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::domain::Job;
use crate::error::{Result, TrellisError};

pub use mapping::{FieldMapping, StageMapping};

/// Schema reconciliation between pipeline stages.
///
/// Mappings are keyed by the downstream stage index; stages without a
/// declared mapping receive the upstream output unchanged.
#[derive(Debug, Default)]
pub struct DataFlow {
    mappings: HashMap<usize, StageMapping>,
}

impl DataFlow {
    /// Create a DataFlow with no declared mappings (pass-through).
    pub fn new() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    /// Create a DataFlow from per-stage mappings keyed by downstream index.
    pub fn with_mappings(mappings: HashMap<usize, StageMapping>) -> Self {
        Self { mappings }
    }

    /// Build the input payload for a stage.
    ///
    /// Stage 0 receives the job's original input. Later stages receive the
    /// mapped projection of the previous stage's latest successful output.
    /// A missing required field fails with `IncompatibleSchema` - permanent,
    /// never retried.
    pub fn stage_input(&self, job: &Job, stage_index: usize) -> Result<Value> {
        if stage_index == 0 {
            return Ok(job.input.clone());
        }

        let upstream = job
            .latest_output(stage_index - 1)
            .ok_or_else(|| TrellisError::InvalidState(format!(
                "stage {} has no upstream output to adapt",
                stage_index
            )))?;

        let mapping = match self.mappings.get(&stage_index) {
            Some(mapping) => mapping,
            None => return Ok(upstream.clone()),
        };

        if mapping.fields.is_empty() && !mapping.carry_job_input {
            return Ok(upstream.clone());
        }

        let mut input = Map::new();

        if mapping.carry_job_input {
            if let Value::Object(original) = &job.input {
                for (key, value) in original {
                    input.insert(key.clone(), value.clone());
                }
            }
        }

        if mapping.fields.is_empty() {
            if let Value::Object(fields) = upstream {
                for (key, value) in fields {
                    input.insert(key.clone(), value.clone());
                }
            }
        } else {
            for field in &mapping.fields {
                match upstream.get(&field.from) {
                    Some(value) => {
                        input.insert(field.to.clone(), value.clone());
                    }
                    None if field.required => {
                        return Err(TrellisError::IncompatibleSchema {
                            stage: stage_index,
                            field: field.from.clone(),
                        });
                    }
                    None => {}
                }
            }
        }

        Ok(Value::Object(input))
    }

    /// Merge a feedback override into a stage input. The override wins when
    /// a field is supplied by both sides.
    pub fn merge_override(&self, input: &Value, adjusted: &Value) -> Value {
        match (input, adjusted) {
            (Value::Object(base), Value::Object(overrides)) => {
                let mut merged = base.clone();
                for (key, value) in overrides {
                    merged.insert(key.clone(), value.clone());
                }
                Value::Object(merged)
            }
            // A non-object override replaces the input wholesale
            (_, adjusted) => adjusted.clone(),
        }
    }

    /// Aggregate the final job result from the latest output of every plan
    /// stage, in stage order. Later stages win field conflicts, which makes
    /// the result a deterministic function of the stage outputs.
    pub fn aggregate(&self, job: &Job) -> Result<Value> {
        let mut result = Map::new();

        for stage_index in 0..job.plan.len() {
            let output = job.latest_output(stage_index).ok_or_else(|| {
                TrellisError::InvalidState(format!(
                    "cannot aggregate: stage {} has no successful output",
                    stage_index
                ))
            })?;

            match output {
                Value::Object(fields) => {
                    for (key, value) in fields {
                        result.insert(key.clone(), value.clone());
                    }
                }
                other => {
                    result.insert(job.plan[stage_index].name.clone(), other.clone());
                }
            }
        }

        Ok(Value::Object(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Layer, PlannedStage, StageRecord};
    use serde_json::json;

    fn job_with_output(stage_index: usize, output: Value) -> Job {
        let plan = vec![
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
        ];
        let mut job = Job::new(json!({"topic": "rust"}), plan, 2);
        let mut record = StageRecord::begin(stage_index, Layer::Bottom, "structural-validator", 1);
        record.succeed(output);
        job.stages.push(record);
        job
    }

    #[test]
    fn test_stage_zero_receives_job_input() {
        let job = job_with_output(0, json!({}));
        let dataflow = DataFlow::new();
        assert_eq!(dataflow.stage_input(&job, 0).unwrap(), json!({"topic": "rust"}));
    }

    #[test]
    fn test_undeclared_mapping_passes_through() {
        let job = job_with_output(0, json!({"valid": true, "score": 0.9}));
        let dataflow = DataFlow::new();
        assert_eq!(
            dataflow.stage_input(&job, 1).unwrap(),
            json!({"valid": true, "score": 0.9})
        );
    }

    #[test]
    fn test_declared_mapping_projects_fields() {
        let job = job_with_output(0, json!({"outline": ["a"], "noise": 1}));
        let mut mappings = HashMap::new();
        mappings.insert(
            1,
            StageMapping {
                fields: vec![FieldMapping::required("outline").renamed("structure")],
                carry_job_input: false,
            },
        );
        let dataflow = DataFlow::with_mappings(mappings);

        assert_eq!(
            dataflow.stage_input(&job, 1).unwrap(),
            json!({"structure": ["a"]})
        );
    }

    #[test]
    fn test_missing_required_field_is_incompatible_schema() {
        let job = job_with_output(0, json!({"unrelated": true}));
        let mut mappings = HashMap::new();
        mappings.insert(
            1,
            StageMapping {
                fields: vec![FieldMapping::required("outline")],
                carry_job_input: false,
            },
        );
        let dataflow = DataFlow::with_mappings(mappings);

        let err = dataflow.stage_input(&job, 1).unwrap_err();
        assert!(matches!(
            err,
            TrellisError::IncompatibleSchema { stage: 1, ref field } if field == "outline"
        ));
    }

    #[test]
    fn test_missing_optional_field_is_skipped() {
        let job = job_with_output(0, json!({"outline": []}));
        let mut mappings = HashMap::new();
        mappings.insert(
            1,
            StageMapping {
                fields: vec![
                    FieldMapping::required("outline"),
                    FieldMapping::optional("citations"),
                ],
                carry_job_input: false,
            },
        );
        let dataflow = DataFlow::with_mappings(mappings);

        assert_eq!(dataflow.stage_input(&job, 1).unwrap(), json!({"outline": []}));
    }

    #[test]
    fn test_carry_job_input_loses_conflicts_to_upstream() {
        let job = job_with_output(0, json!({"topic": "refined"}));
        let mut mappings = HashMap::new();
        mappings.insert(
            1,
            StageMapping {
                fields: vec![],
                carry_job_input: true,
            },
        );
        let dataflow = DataFlow::with_mappings(mappings);

        // Upstream "topic" overwrites the original input's "topic"
        assert_eq!(
            dataflow.stage_input(&job, 1).unwrap(),
            json!({"topic": "refined"})
        );
    }

    #[test]
    fn test_merge_override_wins() {
        let dataflow = DataFlow::new();
        let merged = dataflow.merge_override(
            &json!({"strategy": "default", "depth": 2}),
            &json!({"strategy": "conservative"}),
        );
        assert_eq!(merged, json!({"strategy": "conservative", "depth": 2}));
    }

    #[test]
    fn test_merge_non_object_override_replaces() {
        let dataflow = DataFlow::new();
        let merged = dataflow.merge_override(&json!({"a": 1}), &json!("replacement"));
        assert_eq!(merged, json!("replacement"));
    }

    #[test]
    fn test_aggregate_merges_in_stage_order() {
        let plan = vec![
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
        ];
        let mut job = Job::new(json!({}), plan, 2);

        let mut first = StageRecord::begin(0, Layer::Bottom, "structural-validator", 1);
        first.succeed(json!({"score": 0.4, "valid": true}));
        job.stages.push(first);

        let mut second = StageRecord::begin(1, Layer::Middle, "semantic-structurer", 1);
        second.succeed(json!({"score": 0.9, "outline": []}));
        job.stages.push(second);

        let result = DataFlow::new().aggregate(&job).unwrap();
        assert_eq!(result, json!({"score": 0.9, "valid": true, "outline": []}));
    }

    #[test]
    fn test_aggregate_fails_without_outputs() {
        let plan = vec![PlannedStage {
            name: "validate".to_string(),
            layer: Layer::Bottom,
            provider_ref: "structural-validator".to_string(),
        }];
        let job = Job::new(json!({}), plan, 1);
        assert!(DataFlow::new().aggregate(&job).is_err());
    }
}
