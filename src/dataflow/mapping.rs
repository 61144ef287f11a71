//! Declared field mappings between pipeline stages.

use serde::{Deserialize, Serialize};

/// One output-field-to-input-field wire between adjacent stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name in the upstream stage's output
    pub from: String,
    /// Field name in the downstream stage's input
    pub to: String,
    /// Missing required fields are a contract violation, not a provider error
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    /// A required field wired under the same name on both sides.
    pub fn required(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            from: name.clone(),
            to: name,
            required: true,
        }
    }

    /// An optional field wired under the same name on both sides.
    pub fn optional(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            from: name.clone(),
            to: name,
            required: false,
        }
    }

    /// Rename the downstream field.
    pub fn renamed(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }
}

/// Declared input mapping for one downstream stage.
///
/// When `fields` is empty the upstream output passes through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMapping {
    /// Which upstream output fields feed which downstream input fields
    #[serde(default)]
    pub fields: Vec<FieldMapping>,

    /// Also merge the job's original request payload into the stage input
    /// (upstream output wins field conflicts with the original input)
    #[serde(default)]
    pub carry_job_input: bool,
}
