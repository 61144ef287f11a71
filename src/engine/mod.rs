//! Workflow Engine
//!
//! Stage-plan execution: the drive loop, retry policy, and the interplay
//! between Data Flow, Capability Providers, the Feedback Loop, and
//! Performance Monitoring.

pub mod backoff;
pub mod workflow;

pub use backoff::RetryPolicy;
pub use workflow::{EngineConfig, WorkflowEngine};
