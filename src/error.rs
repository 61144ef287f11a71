//! Error types for Trellis
//!
//! Centralized error handling using thiserror. Provider-level failures have
//! their own taxonomy in `crate::provider`; everything that escapes a stage
//! retry loop is folded into these variants before it reaches a caller.

use thiserror::Error;

/// All error types that can occur in Trellis
#[derive(Debug, Error)]
pub enum TrellisError {
    /// Request payload failed schema validation; the job was never created
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Job not found in the registry (absent or garbage-collected)
    #[error("Job not found: {0}")]
    NotFound(String),

    /// A drive request arrived for a job that already has a driver
    #[error("Job already running: {0}")]
    AlreadyRunning(String),

    /// Upstream output is missing a field the downstream mapping requires
    #[error("Incompatible schema at stage {stage}: missing field '{field}'")]
    IncompatibleSchema { stage: usize, field: String },

    /// A stage exhausted its retry budget or hit a permanent provider error
    #[error("Provider failed: {0}")]
    ProviderFailed(String),

    /// A provider call exceeded its configured deadline
    #[error("Provider timed out: {0}")]
    Timeout(String),

    /// The feedback rewind budget was exhausted while a rewind was requested
    #[error("Iteration budget exceeded for job {0}")]
    BudgetExceeded(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrellisError {
    /// Stable machine-readable code for the caller-facing error surface.
    pub fn code(&self) -> &'static str {
        match self {
            TrellisError::InvalidInput(_) => "InvalidInput",
            TrellisError::NotFound(_) => "NotFound",
            TrellisError::AlreadyRunning(_) => "AlreadyRunning",
            TrellisError::IncompatibleSchema { .. } => "IncompatibleSchema",
            TrellisError::ProviderFailed(_) => "ProviderFailed",
            TrellisError::Timeout(_) => "Timeout",
            TrellisError::BudgetExceeded(_) => "BudgetExceeded",
            TrellisError::InvalidState(_) => "InvalidState",
            TrellisError::Storage(_) => "Storage",
            TrellisError::Io(_) => "Io",
            TrellisError::Json(_) => "Json",
        }
    }
}

/// Result type alias for Trellis operations
pub type Result<T> = std::result::Result<T, TrellisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = TrellisError::NotFound("job-001".to_string());
        assert_eq!(err.to_string(), "Job not found: job-001");
        assert_eq!(err.code(), "NotFound");
    }

    #[test]
    fn test_already_running_error() {
        let err = TrellisError::AlreadyRunning("job-002".to_string());
        assert_eq!(err.to_string(), "Job already running: job-002");
    }

    #[test]
    fn test_incompatible_schema_error() {
        let err = TrellisError::IncompatibleSchema {
            stage: 2,
            field: "entities".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Incompatible schema at stage 2: missing field 'entities'"
        );
        assert_eq!(err.code(), "IncompatibleSchema");
    }

    #[test]
    fn test_budget_exceeded_error() {
        let err = TrellisError::BudgetExceeded("job-003".to_string());
        assert_eq!(err.to_string(), "Iteration budget exceeded for job job-003");
        assert_eq!(err.code(), "BudgetExceeded");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TrellisError = io_err.into();
        assert!(matches!(err, TrellisError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: TrellisError = json_err.into();
        assert!(matches!(err, TrellisError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TrellisError::InvalidState("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
