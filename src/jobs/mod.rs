//! Job Management Service
//!
//! Owns the job registry: creation, identity, status, cancellation, result
//! retrieval, and garbage collection of completed/expired jobs.

pub mod registry;

pub use registry::{JobRegistry, JobRegistryConfig};
