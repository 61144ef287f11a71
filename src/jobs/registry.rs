//! Job registry implementation
//!
//! Owns job identity and lifecycle bookkeeping: creation against the
//! configured topology, lookup, cooperative cancellation, filtered listing,
//! retention-based garbage collection, and the at-most-one-driver guard the
//! Workflow Engine relies on for single-writer semantics.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::domain::{Job, JobFilter, JobStatus, PlannedStage, StageEvent};
use crate::error::{Result, TrellisError};
use crate::id::now_ms;
use crate::realtime::UpdateHub;
use crate::storage::{Filter, Storage, JOBS_COLLECTION};

/// Configuration for the job registry
#[derive(Debug, Clone)]
pub struct JobRegistryConfig {
    /// Feedback rewinds allowed per job
    pub default_iteration_budget: u32,
    /// Terminal jobs older than this are eligible for eviction
    pub retention_ms: i64,
}

impl Default for JobRegistryConfig {
    fn default() -> Self {
        Self {
            default_iteration_budget: 3,
            retention_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Registry of jobs backed by durable storage
pub struct JobRegistry<S: Storage> {
    storage: Arc<S>,
    hub: Arc<UpdateHub>,
    plan_template: Vec<PlannedStage>,
    config: JobRegistryConfig,
    /// Jobs with an active drive loop
    driving: RwLock<HashSet<String>>,
    /// Jobs with an unacknowledged cancel request. Authoritative while the
    /// job is live; the persisted flag on the record is a mirror for
    /// `status` readers, not the source the engine consults.
    cancel_requests: RwLock<HashSet<String>>,
}

impl<S: Storage> JobRegistry<S> {
    /// Create a registry over the given storage, update hub, and topology.
    pub fn new(
        storage: Arc<S>,
        hub: Arc<UpdateHub>,
        plan_template: Vec<PlannedStage>,
        config: JobRegistryConfig,
    ) -> Self {
        Self {
            storage,
            hub,
            plan_template,
            config,
            driving: RwLock::new(HashSet::new()),
            cancel_requests: RwLock::new(HashSet::new()),
        }
    }

    /// Validate and persist a new job built from the configured topology.
    pub fn create_job(&self, input: Value) -> Result<Job> {
        let fields = input
            .as_object()
            .ok_or_else(|| TrellisError::InvalidInput("request payload must be a JSON object".to_string()))?;
        if fields.is_empty() {
            return Err(TrellisError::InvalidInput(
                "request payload must not be empty".to_string(),
            ));
        }
        if self.plan_template.is_empty() {
            return Err(TrellisError::InvalidState(
                "no stage topology configured".to_string(),
            ));
        }

        let job = Job::new(
            input,
            self.plan_template.clone(),
            self.config.default_iteration_budget,
        );
        self.storage.create(JOBS_COLLECTION, &job)?;

        tracing::info!(job_id = %job.id, stages = job.plan.len(), "Job created");
        self.hub.publish(StageEvent::job_created(&job));

        Ok(job)
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.storage
            .get(JOBS_COLLECTION, job_id)?
            .ok_or_else(|| TrellisError::NotFound(job_id.to_string()))
    }

    /// Persist a mutated job. Only the engine's drive loop writes a running
    /// job; single-writer semantics come from the drive guard.
    ///
    /// The cooperative cancel flag is the one field written outside the
    /// drive loop. It lives in `cancel_requests` and is folded into every
    /// write, so a stale in-memory copy can never clear a cancellation that
    /// landed between this writer's read and its write.
    pub fn save(&self, job: &mut Job) -> Result<()> {
        if self.cancel_pending(&job.id) {
            job.cancel_requested = true;
        }
        job.touch();
        self.storage.update(JOBS_COLLECTION, &job.id.clone(), job)?;
        if job.status.is_terminal() {
            if let Ok(mut requests) = self.cancel_requests.write() {
                requests.remove(&job.id);
            }
        }
        Ok(())
    }

    /// True while a cancel request for this job is unacknowledged.
    pub fn cancel_pending(&self, job_id: &str) -> bool {
        self.cancel_requests
            .read()
            .map(|requests| requests.contains(job_id))
            .unwrap_or(false)
    }

    /// Request cancellation.
    ///
    /// Terminal jobs: no-op. A never-driven Pending job transitions to
    /// Cancelled immediately. A running job gets a cooperative flag the
    /// engine observes at its next checkpoint.
    pub fn cancel_job(&self, job_id: &str) -> Result<()> {
        let mut job = self.get_job(job_id)?;

        if job.status.is_terminal() {
            return Ok(());
        }

        if job.status == JobStatus::Pending {
            job.status = JobStatus::Cancelled;
            self.save(&mut job)?;
            tracing::info!(job_id = %job_id, "Pending job cancelled");
            self.hub.publish(StageEvent::job_terminal(&job));
            return Ok(());
        }

        self.cancel_requests
            .write()
            .map_err(|e| TrellisError::Storage(e.to_string()))?
            .insert(job_id.to_string());
        job.cancel_requested = true;
        self.save(&mut job)?;
        tracing::info!(job_id = %job_id, "Cancellation requested");
        Ok(())
    }

    /// List jobs matching a status/time-range filter.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut filters = Vec::new();
        if let Some(status) = filter.status {
            filters.push(Filter::eq("status", serde_json::to_value(status)?));
        }
        if let Some(created_after) = filter.created_after {
            filters.push(Filter::gte("created_at", created_after));
        }
        if let Some(created_before) = filter.created_before {
            filters.push(Filter::lt("created_at", created_before));
        }
        self.storage.query(JOBS_COLLECTION, &filters)
    }

    /// Evict terminal jobs older than the retention window. A job with a
    /// subscription awaiting delivery is never evicted. Returns the number
    /// of jobs evicted.
    pub fn collect_garbage(&self) -> Result<usize> {
        let cutoff = now_ms() - self.config.retention_ms;
        let jobs: Vec<Job> = self.storage.list(JOBS_COLLECTION)?;

        let mut evicted = 0;
        for job in jobs {
            if !job.status.is_terminal() || job.updated_at >= cutoff {
                continue;
            }
            if self.hub.has_pending_delivery(&job.id) {
                tracing::debug!(job_id = %job.id, "Skipping eviction, delivery pending");
                continue;
            }

            self.storage.delete(JOBS_COLLECTION, &job.id)?;
            self.hub.forget_job(&job.id);
            evicted += 1;
            tracing::info!(job_id = %job.id, "Job evicted");
        }

        Ok(evicted)
    }

    /// Acquire the drive lease for a job. Fails with `AlreadyRunning` if a
    /// drive loop is already active for it.
    pub fn begin_drive(&self, job_id: &str) -> Result<()> {
        let mut driving = self
            .driving
            .write()
            .map_err(|e| TrellisError::Storage(e.to_string()))?;
        if !driving.insert(job_id.to_string()) {
            return Err(TrellisError::AlreadyRunning(job_id.to_string()));
        }
        Ok(())
    }

    /// Release the drive lease. Idempotent.
    pub fn end_drive(&self, job_id: &str) {
        if let Ok(mut driving) = self.driving.write() {
            driving.remove(job_id);
        }
    }

    /// True while a drive loop holds the lease for this job.
    pub fn is_driving(&self, job_id: &str) -> bool {
        self.driving
            .read()
            .map(|driving| driving.contains(job_id))
            .unwrap_or(false)
    }

    /// The update hub used for event fan-out.
    pub fn hub(&self) -> &Arc<UpdateHub> {
        &self.hub
    }
}
