//! Trellis - a workflow orchestration engine for layered content pipelines
//!
//! Trellis drives content-generation jobs through a three-layer stage plan
//! (structural validation, semantic structuring, authority enrichment),
//! reconciling schemas between stages, retrying transient provider failures,
//! and feeding quality signals back into earlier stages within a bounded
//! iteration budget.

pub mod config;
pub mod dataflow;
pub mod domain;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod id;
pub mod jobs;
pub mod monitor;
pub mod provider;
pub mod realtime;
pub mod storage;

pub use error::{Result, TrellisError};
