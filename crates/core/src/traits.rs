// Core traits for pluggable backends
//
// These traits keep the engine independent of where state lives:
// - Postgres implementations for production (autopilot-storage, autopilot-durable)
// - In-memory implementations for dev mode and tests (crate::memory)

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{QueueError, StoreError};
use crate::job::{JobStatus, NewJob, WorkflowJob};
use crate::run::{NewRun, RunFilter, RunStatus, RunSummary, WorkflowRun};
use crate::template::WorkflowTemplate;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// WorkflowStore - Durable state for templates, runs and jobs
// ============================================================================

/// Persistence for workflow templates, runs and jobs.
///
/// Updates are compare-and-set. `update_job` succeeds only while the stored
/// status equals `expected`. `update_run` additionally requires the stored
/// `updated_at` to equal the one on the passed row, so a run loaded, mutated
/// and written back never overwrites a concurrent write. On conflict the caller
/// must reload and decide again.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // Templates

    /// Insert or update templates keyed by slug. The stored version is bumped
    /// whenever the definition differs. Returns the stored rows with ids.
    async fn upsert_templates(
        &self,
        templates: Vec<WorkflowTemplate>,
    ) -> StoreResult<Vec<WorkflowTemplate>>;

    async fn list_templates(&self) -> StoreResult<Vec<WorkflowTemplate>>;

    // Runs

    /// Create a run and all of its initial jobs atomically.
    async fn create_run(
        &self,
        run: NewRun,
        jobs: Vec<NewJob>,
    ) -> StoreResult<(WorkflowRun, Vec<WorkflowJob>)>;

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>>;

    /// Most recent run for a campaign that was not cancelled.
    async fn find_existing_run_for_campaign(
        &self,
        campaign_id: Uuid,
    ) -> StoreResult<Option<WorkflowRun>>;

    /// Runs ordered newest first, annotated with job counts.
    async fn list_runs(&self, filter: RunFilter) -> StoreResult<Vec<RunSummary>>;

    /// Persist `run` if the stored row is unchanged since it was loaded and its
    /// status still equals `expected`. Returns the stored row, or `None` on conflict.
    async fn update_run(
        &self,
        run: &WorkflowRun,
        expected: RunStatus,
    ) -> StoreResult<Option<WorkflowRun>>;

    // Jobs

    /// Append a job to an existing run.
    async fn create_job(&self, run_id: Uuid, job: NewJob) -> StoreResult<WorkflowJob>;

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<WorkflowJob>>;

    /// All jobs of a run in creation order.
    async fn list_jobs(&self, run_id: Uuid) -> StoreResult<Vec<WorkflowJob>>;

    /// Persist `job` if its stored status still equals `expected`.
    async fn update_job(&self, job: &WorkflowJob, expected: JobStatus) -> StoreResult<bool>;

    /// Atomically move PENDING jobs to QUEUED. Returns only the ids this call
    /// transitioned, so concurrent dispatchers never enqueue the same job twice.
    async fn mark_jobs_queued(&self, run_id: Uuid, job_ids: &[Uuid]) -> StoreResult<Vec<Uuid>>;
}

// ============================================================================
// JobQueue - Delivery of job envelopes to workers
// ============================================================================

/// Options for a single enqueue.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Deliver no earlier than this far in the future.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

/// Named work queues with at-least-once delivery.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Enqueue a payload for `job_name` on `queue`. Returns the queue's task id.
    async fn add_job(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> std::result::Result<String, QueueError>;
}
