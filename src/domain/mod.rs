//! Domain types for Trellis
//!
//! This module contains all core domain types:
//! - Job: the unit of orchestration work with its stage plan and history
//! - StageRecord: one attempt at one pipeline stage (append-only)
//! - FeedbackDecision: outcome of evaluating a completed stage
//! - StageEvent: wire shape broadcast to realtime subscribers

pub mod event;
pub mod feedback;
pub mod job;
pub mod stage;

pub use event::{event_kinds, StageEvent};
pub use feedback::{FeedbackAction, FeedbackDecision};
pub use job::{Job, JobError, JobFilter, JobStatus, PlannedStage};
pub use stage::{Layer, StageError, StageRecord, StageStatus};
