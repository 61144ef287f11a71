//! Workflow Engine
//!
//! The drive loop that advances one job through its stage plan: builds each
//! stage's input via Data Flow, invokes the Capability Provider under a
//! deadline, retries transient failures with backoff, consults the Feedback
//! Loop after every terminal stage record, applies rewinds against the
//! iteration budget, and aggregates the final result. The engine is the sole
//! writer of a running job; the at-most-one-driver lease in the Job Registry
//! enforces that.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;

use crate::dataflow::DataFlow;
use crate::domain::{
    FeedbackAction, Job, JobError, JobStatus, StageError, StageEvent, StageRecord, StageStatus,
};
use crate::engine::backoff::RetryPolicy;
use crate::error::{Result, TrellisError};
use crate::feedback::FeedbackPolicy;
use crate::jobs::JobRegistry;
use crate::monitor::{PerformanceMonitor, StageSample};
use crate::provider::{ProviderContext, ProviderError, ProviderRegistry};
use crate::storage::Storage;

/// Configuration for the drive loop
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry behavior for transient provider failures
    pub retry: RetryPolicy,
    /// Deadline for a single provider call
    pub provider_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            provider_timeout_ms: 30_000,
        }
    }
}

/// Drives jobs through their stage plans
pub struct WorkflowEngine<S: Storage, F: FeedbackPolicy> {
    registry: Arc<JobRegistry<S>>,
    providers: Arc<ProviderRegistry>,
    dataflow: Arc<DataFlow>,
    feedback: Arc<F>,
    monitor: Arc<PerformanceMonitor<S>>,
    config: EngineConfig,
}

impl<S, F> WorkflowEngine<S, F>
where
    S: Storage + 'static,
    F: FeedbackPolicy,
{
    /// Wire an engine over its collaborators.
    pub fn new(
        registry: Arc<JobRegistry<S>>,
        providers: Arc<ProviderRegistry>,
        dataflow: Arc<DataFlow>,
        feedback: Arc<F>,
        monitor: Arc<PerformanceMonitor<S>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            providers,
            dataflow,
            feedback,
            monitor,
            config,
        }
    }

    /// Drive a pending job to a terminal status.
    ///
    /// Fails with `AlreadyRunning` if another drive loop holds the lease for
    /// this job. The lease is released on every exit path.
    pub async fn drive(&self, job_id: &str) -> Result<Job> {
        self.registry.begin_drive(job_id)?;
        let outcome = self.drive_inner(job_id).await;
        if let Err(error) = &outcome {
            self.record_abandonment(job_id, error);
        }
        self.registry.end_drive(job_id);
        outcome
    }

    /// A drive loop that errors out after the job was persisted as Running
    /// would otherwise strand it: non-terminal, invisible to GC, and
    /// rejected by every future drive. Record the failure on the job so it
    /// surfaces through `status` like any other terminal error.
    fn record_abandonment(&self, job_id: &str, error: &TrellisError) {
        let Ok(mut job) = self.registry.get_job(job_id) else {
            return;
        };
        if job.status != JobStatus::Running && job.status != JobStatus::AwaitingFeedback {
            return;
        }
        job.status = JobStatus::Failed;
        job.last_error = Some(JobError::new(error.code(), error.to_string()));
        if let Err(save_error) = self.registry.save(&mut job) {
            tracing::error!(job_id = %job_id, %save_error, "Could not record drive failure");
            return;
        }
        tracing::warn!(job_id = %job_id, %error, "Drive loop abandoned, job marked failed");
        self.registry.hub().publish(StageEvent::job_terminal(&job));
    }

    async fn drive_inner(&self, job_id: &str) -> Result<Job> {
        let mut job = self.registry.get_job(job_id)?;

        if job.status != JobStatus::Pending {
            return Err(TrellisError::InvalidState(format!(
                "job {} cannot be driven from status {:?}",
                job_id, job.status
            )));
        }

        job.status = JobStatus::Running;
        self.registry.save(&mut job)?;
        tracing::info!(job_id = %job.id, stages = job.plan.len(), "Drive loop started");
        self.registry.hub().publish(StageEvent::job_started(&job.id));

        // Adjusted input from the most recent rewind, consumed by the next
        // run of the target stage
        let mut pending_override: Option<Value> = None;

        while job.current_stage < job.plan.len() {
            if self.refresh_cancellation(&mut job)? {
                return self.finish_cancelled(job);
            }

            let stage_index = job.current_stage;
            let input = match self.dataflow.stage_input(&job, stage_index) {
                Ok(input) => match pending_override.take() {
                    Some(adjusted) => self.dataflow.merge_override(&input, &adjusted),
                    None => input,
                },
                Err(TrellisError::IncompatibleSchema { stage, field }) => {
                    // Schema mismatch is permanent and the stage's provider
                    // is never invoked
                    return self.finish_schema_mismatch(job, stage, field);
                }
                Err(other) => return Err(other),
            };

            let record = self.run_stage(&mut job, stage_index, input).await?;

            if self.refresh_cancellation(&mut job)? {
                return self.finish_cancelled(job);
            }

            job.status = JobStatus::AwaitingFeedback;
            self.registry.save(&mut job)?;
            let decision = self.feedback.evaluate(&record, &job);
            job.status = JobStatus::Running;

            match decision.action {
                FeedbackAction::Continue => {
                    if record.status == StageStatus::Failed {
                        let error = record
                            .error
                            .as_ref()
                            .map(|e| JobError::new(e.code.clone(), e.reason.clone()))
                            .unwrap_or_else(|| {
                                JobError::new("ProviderFailed", "stage failed")
                            });
                        return self.finish_failed(job, error);
                    }
                    job.current_stage += 1;
                    self.registry.save(&mut job)?;
                }
                FeedbackAction::Rewind(target) => {
                    if target >= job.current_stage {
                        return Err(TrellisError::InvalidState(format!(
                            "feedback rewind to stage {} does not precede stage {}",
                            target, job.current_stage
                        )));
                    }
                    if job.iteration_budget == 0 {
                        tracing::warn!(job_id = %job.id, "Rewind requested with no budget left");
                        return self.finish_failed(
                            job,
                            JobError::new("BudgetExceeded", "iteration budget exhausted"),
                        );
                    }
                    job.iteration_budget -= 1;
                    job.current_stage = target;
                    pending_override = decision.adjusted_input;
                    self.registry.save(&mut job)?;
                    tracing::info!(
                        job_id = %job.id,
                        target,
                        budget_left = job.iteration_budget,
                        reason = %decision.reason,
                        "Rewinding"
                    );
                    self.registry
                        .hub()
                        .publish(StageEvent::stage_rewound(&job.id, target, &decision.reason));
                }
                FeedbackAction::Abort => {
                    return self.finish_failed(job, JobError::new("Aborted", decision.reason));
                }
            }
        }

        let result = self.dataflow.aggregate(&job)?;
        job.result = Some(result);
        job.status = JobStatus::Succeeded;
        self.registry.save(&mut job)?;
        tracing::info!(job_id = %job.id, "Job succeeded");
        self.registry.hub().publish(StageEvent::job_terminal(&job));
        Ok(job)
    }

    /// Run one stage to a terminal record, retrying transient failures.
    ///
    /// Every attempt is appended to the job's stage history and persisted
    /// before the matching event is published.
    async fn run_stage(&self, job: &mut Job, stage_index: usize, input: Value) -> Result<StageRecord> {
        let planned = job.plan[stage_index].clone();
        let provider = self.providers.get(&planned.provider_ref)?;
        let deadline = Duration::from_millis(self.config.provider_timeout_ms);

        let mut attempt = 1u32;
        loop {
            let mut record =
                StageRecord::begin(stage_index, planned.layer, &planned.provider_ref, attempt);
            self.registry
                .hub()
                .publish(StageEvent::stage_started(&job.id, &record));

            let ctx = ProviderContext {
                job_id: job.id.clone(),
                attempt,
            };
            let outcome = match timeout(deadline, provider.execute(input.clone(), &ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(self.config.provider_timeout_ms)),
            };

            match outcome {
                Ok(output) => {
                    record.succeed(output);
                    self.report(&record);
                    job.stages.push(record.clone());
                    self.registry.save(job)?;
                    self.registry
                        .hub()
                        .publish(StageEvent::stage_complete(&job.id, &record));
                    return Ok(record);
                }
                Err(error) => {
                    let code = match &error {
                        ProviderError::Timeout(_) => "Timeout",
                        _ => "ProviderFailed",
                    };
                    record.fail(StageError::new(code, error.to_string()));
                    self.report(&record);
                    job.stages.push(record.clone());
                    self.registry.save(job)?;
                    self.registry
                        .hub()
                        .publish(StageEvent::stage_complete(&job.id, &record));

                    let retryable = error.is_transient() && self.config.retry.allows_retry(attempt);
                    if !retryable {
                        tracing::warn!(
                            job_id = %job.id,
                            stage = stage_index,
                            attempt,
                            %error,
                            "Stage failed"
                        );
                        return Ok(record);
                    }

                    // Cancellation checkpoint between attempts; the failed
                    // record stands and the outer loop observes the flag
                    if self.refresh_cancellation(job)? {
                        return Ok(record);
                    }

                    let delay = self.config.retry.delay_after(attempt);
                    tracing::warn!(
                        job_id = %job.id,
                        stage = stage_index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Transient stage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Observe the cooperative cancellation flag.
    ///
    /// The registry raises the flag while the engine holds the job in
    /// memory, so checkpoints consult the registry's request set rather
    /// than this copy. The persisted flag is also checked so a request
    /// that only survives on disk (a prior process) is still honored.
    fn refresh_cancellation(&self, job: &mut Job) -> Result<bool> {
        if self.registry.cancel_pending(&job.id) {
            job.cancel_requested = true;
            return Ok(true);
        }
        let stored = self.registry.get_job(&job.id)?;
        job.cancel_requested = stored.cancel_requested;
        Ok(job.cancel_requested)
    }

    /// Report a terminal stage record to Performance Monitoring without
    /// blocking stage advance.
    fn report(&self, record: &StageRecord) {
        let monitor = Arc::clone(&self.monitor);
        let sample = StageSample::from_record(record);
        tokio::spawn(async move {
            monitor.record(sample);
        });
    }

    fn finish_cancelled(&self, mut job: Job) -> Result<Job> {
        job.status = JobStatus::Cancelled;
        job.last_error = None;
        self.registry.save(&mut job)?;
        tracing::info!(job_id = %job.id, "Job cancelled at checkpoint");
        self.registry.hub().publish(StageEvent::job_terminal(&job));
        Ok(job)
    }

    fn finish_failed(&self, mut job: Job, error: JobError) -> Result<Job> {
        tracing::warn!(job_id = %job.id, code = %error.code, reason = %error.reason, "Job failed");
        job.status = JobStatus::Failed;
        job.last_error = Some(error);
        self.registry.save(&mut job)?;
        self.registry.hub().publish(StageEvent::job_terminal(&job));
        Ok(job)
    }

    fn finish_schema_mismatch(&self, mut job: Job, stage: usize, field: String) -> Result<Job> {
        let planned = &job.plan[stage];
        let mut record = StageRecord::begin(stage, planned.layer, &planned.provider_ref, 1);
        record.fail(StageError::new(
            "IncompatibleSchema",
            format!("upstream output is missing required field '{}'", field),
        ));
        job.stages.push(record.clone());
        self.registry.save(&mut job)?;
        self.registry
            .hub()
            .publish(StageEvent::stage_complete(&job.id, &record));

        self.finish_failed(
            job,
            JobError::new(
                "IncompatibleSchema",
                format!("stage {} input is missing required field '{}'", stage, field),
            ),
        )
    }
}
