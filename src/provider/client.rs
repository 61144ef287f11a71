//! Capability Provider trait and error taxonomy
//!
//! A Capability Provider is the narrow interface to one per-layer analysis
//! or generation service. The orchestrator only ever sees structured JSON in,
//! structured JSON out, and one of three failure classes.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure classes a provider call can signal.
///
/// The engine retries Transient (and Timeout) failures with backoff;
/// Permanent failures fail the stage immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Rate limit, momentary unavailability, connection reset
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Rejected input, bad credentials, anything a retry will not fix
    #[error("Permanent provider error: {0}")]
    Permanent(String),

    /// The call exceeded its configured deadline
    #[error("Provider call timed out after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// True if the engine's retry loop should absorb this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }
}

/// Per-call context passed alongside the stage input.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Job the stage belongs to
    pub job_id: String,
    /// 1-based attempt counter for this stage
    pub attempt: u32,
}

/// Narrow contract every per-layer service is invoked through.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Execute one stage's work on the adapted input payload.
    async fn execute(&self, input: Value, ctx: &ProviderContext) -> Result<Value, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        assert!(ProviderError::Transient("429".to_string()).is_transient());
        assert!(ProviderError::Timeout(30_000).is_transient());
        assert!(!ProviderError::Permanent("bad input".to_string()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Timeout(5000);
        assert_eq!(err.to_string(), "Provider call timed out after 5000ms");

        let err = ProviderError::Permanent("schema rejected".to_string());
        assert_eq!(err.to_string(), "Permanent provider error: schema rejected");
    }
}
