//! Durable record storage.
//!
//! Logical layout: the `jobs` collection keyed by job id, and the
//! append-only `metrics` log. The backend is JSONL files; the `Storage`
//! trait keeps the rest of the crate independent of that choice.

pub mod jsonl;
pub mod traits;

/// Collection name for jobs
pub const JOBS_COLLECTION: &str = "jobs";

/// Collection name for the append-only metrics log
pub const METRICS_COLLECTION: &str = "metrics";

pub use jsonl::JsonlStorage;
pub use traits::{Filter, FilterOp, HasId, Storage};
