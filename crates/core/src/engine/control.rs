// Run control API
//
// Operator-facing operations on runs and jobs. Ownership gates every call:
// a caller sees and changes only their own runs unless they are an admin.

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::progress::reopen;
use super::{DispatchReason, WorkflowEngine};
use crate::error::{EngineError, Result};
use crate::job::{JobStatus, WorkflowJob};
use crate::run::{RunDetail, RunFilter, RunStatus, RunSummary, WorkflowRun};
use crate::traits::EnqueueOptions;

/// Identity of whoever invokes the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    fn can_access(&self, run: &WorkflowRun) -> bool {
        self.is_admin || run.user_id == self.user_id
    }

    fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(EngineError::forbidden("administrator role required"))
        }
    }
}

impl WorkflowEngine {
    /// Load a run the caller may access.
    async fn authorized_run(&self, run_id: Uuid, caller: &Caller) -> Result<WorkflowRun> {
        let run = self.load_run(run_id).await?;
        if !caller.can_access(&run) {
            return Err(EngineError::forbidden("run belongs to another user"));
        }
        Ok(run)
    }

    /// Runs visible to the caller, newest first, with job counts.
    #[instrument(skip(self))]
    pub async fn list_runs(
        &self,
        caller: &Caller,
        status: Option<RunStatus>,
    ) -> Result<Vec<RunSummary>> {
        let filter = RunFilter {
            user_id: (!caller.is_admin).then_some(caller.user_id),
            status,
        };
        Ok(self.store.list_runs(filter).await?)
    }

    /// A run with all of its jobs in creation order.
    #[instrument(skip(self))]
    pub async fn get_run(&self, run_id: Uuid, caller: &Caller) -> Result<RunDetail> {
        let run = self.authorized_run(run_id, caller).await?;
        let jobs = self.store.list_jobs(run_id).await?;
        Ok(RunDetail { run, jobs })
    }

    /// Stop dispatching new jobs. Jobs already queued or running still finish.
    #[instrument(skip(self))]
    pub async fn pause_run(&self, run_id: Uuid, caller: &Caller) -> Result<WorkflowRun> {
        for _ in 0..self.config.max_cas_attempts {
            let run = self.authorized_run(run_id, caller).await?;
            if run.status.is_terminal() {
                return Err(EngineError::forbidden(format!(
                    "cannot pause a {} run",
                    run.status
                )));
            }
            if run.status == RunStatus::Paused {
                return Ok(run);
            }

            let mut paused = run.clone();
            paused.status = RunStatus::Paused;
            paused.paused_at = Some(Utc::now());
            if let Some(stored) = self.store.update_run(&paused, run.status).await? {
                info!(%run_id, "workflow run paused");
                return Ok(stored);
            }
        }
        Err(EngineError::conflict(format!("run {} kept changing", run_id)))
    }

    /// Re-enable dispatch and run one dispatch pass.
    #[instrument(skip(self))]
    pub async fn resume_run(&self, run_id: Uuid, caller: &Caller) -> Result<WorkflowRun> {
        let run = self.authorized_run(run_id, caller).await?;
        if run.status != RunStatus::Paused {
            return Err(EngineError::forbidden(format!(
                "cannot resume a {} run",
                run.status
            )));
        }

        let mut resumed = run.clone();
        resumed.status = RunStatus::Active;
        resumed.paused_at = None;

        match self.templates.get_by_slug(&run.template_slug) {
            Some(template) => {
                let started_with = run.metadata.get("template_version").and_then(|v| v.as_i64());
                if started_with != Some(i64::from(template.version)) {
                    warn!(
                        %run_id,
                        slug = %template.slug,
                        version = template.version,
                        ?started_with,
                        "template changed since the run started, existing jobs are kept"
                    );
                    resumed.set_metadata("template_version_on_resume", json!(template.version));
                }
            }
            None => warn!(
                %run_id,
                slug = %run.template_slug,
                "template no longer available, resuming with existing jobs"
            ),
        }

        if self
            .store
            .update_run(&resumed, RunStatus::Paused)
            .await?
            .is_none()
        {
            return Err(EngineError::conflict(format!(
                "run {} changed while resuming",
                run_id
            )));
        }
        info!(%run_id, "workflow run resumed");

        self.dispatch(run_id, DispatchReason::Resumed).await?;
        self.load_run(run_id).await
    }

    /// Reset a FAILED, CANCELLED or SKIPPED job and enqueue it directly.
    #[instrument(skip(self))]
    pub async fn retry_job(&self, job_id: Uuid, caller: &Caller) -> Result<WorkflowJob> {
        let job = self.load_job(job_id).await?;
        let run = self.authorized_run(job.run_id, caller).await?;
        if run.status == RunStatus::Cancelled {
            return Err(EngineError::forbidden("run is cancelled"));
        }
        if !job.status.is_retryable() {
            return Err(EngineError::forbidden(format!(
                "cannot retry a {} job",
                job.status
            )));
        }

        let mut queued = job.clone();
        queued.status = JobStatus::Queued;
        queued.result = None;
        queued.error_message = None;
        queued.attempts = 0;
        queued.started_at = None;
        queued.completed_at = None;
        queued.failed_at = None;
        queued.metadata.clear_failure();
        queued.metadata.recovering = job.status == JobStatus::Failed;
        if !self.store.update_job(&queued, job.status).await? {
            return Err(EngineError::conflict(format!(
                "job {} changed while retrying",
                job_id
            )));
        }

        if let Err(e) = self.enqueue_job(&queued, EnqueueOptions::default()).await {
            warn!(%job_id, error = %e, "retry enqueue failed, rolling back");
            let mut failed = queued.clone();
            failed.status = JobStatus::Failed;
            failed.error_message = Some(format!("retry enqueue failed: {}", e));
            failed.failed_at = Some(Utc::now());
            self.store.update_job(&failed, JobStatus::Queued).await?;
            return Err(EngineError::Queue(e));
        }
        info!(%job_id, step_id = %queued.step_id, "job retry enqueued");

        self.restore_skipped_dependents(run.id, &queued.step_id)
            .await?;
        self.reopen_for_retry(run.id).await?;
        self.update_run_progress(run.id).await?;
        self.load_job(job_id).await
    }

    /// A retried job puts a finished (non-cancelled) run back to ACTIVE.
    async fn reopen_for_retry(&self, run_id: Uuid) -> Result<()> {
        for _ in 0..self.config.max_cas_attempts {
            let run = self.load_run(run_id).await?;
            if !matches!(run.status, RunStatus::Failed | RunStatus::Completed) {
                return Ok(());
            }
            let mut reopened = run.clone();
            reopen(&mut reopened);
            if self.store.update_run(&reopened, run.status).await?.is_some() {
                info!(%run_id, previous = %run.status, "workflow run reopened for retry");
                return Ok(());
            }
        }
        Err(EngineError::conflict(format!("run {} kept changing", run_id)))
    }

    /// Cancel a run and every job that has not started. Admin only.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: Uuid, caller: &Caller) -> Result<WorkflowRun> {
        caller.require_admin()?;

        let mut stored = None;
        for _ in 0..self.config.max_cas_attempts {
            let run = self.load_run(run_id).await?;
            if run.status.is_terminal() {
                return Err(EngineError::forbidden(format!(
                    "cannot cancel a {} run",
                    run.status
                )));
            }
            let mut cancelled = run.clone();
            cancelled.status = RunStatus::Cancelled;
            cancelled.completed_at = Some(Utc::now());
            if let Some(row) = self.store.update_run(&cancelled, run.status).await? {
                stored = Some(row);
                break;
            }
        }
        if stored.is_none() {
            return Err(EngineError::conflict(format!("run {} kept changing", run_id)));
        }

        let mut cancelled_jobs = 0usize;
        for job in self.store.list_jobs(run_id).await? {
            if matches!(job.status, JobStatus::Pending | JobStatus::Queued) {
                let mut cancelled = job.clone();
                cancelled.status = JobStatus::Cancelled;
                cancelled.error_message = Some("run cancelled".to_string());
                if self.store.update_job(&cancelled, job.status).await? {
                    cancelled_jobs += 1;
                }
            }
        }
        info!(%run_id, cancelled_jobs, "workflow run cancelled");

        self.update_run_progress(run_id).await
    }

    /// Cancel a PENDING or QUEUED job. Admin only.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: Uuid, caller: &Caller) -> Result<WorkflowJob> {
        caller.require_admin()?;

        let job = self.load_job(job_id).await?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Queued) {
            return Err(EngineError::forbidden(format!(
                "cannot cancel a {} job",
                job.status
            )));
        }

        let mut cancelled = job.clone();
        cancelled.status = JobStatus::Cancelled;
        cancelled.error_message = Some("cancelled by administrator".to_string());
        if !self.store.update_job(&cancelled, job.status).await? {
            return Err(EngineError::conflict(format!(
                "job {} changed while cancelling",
                job_id
            )));
        }
        info!(%job_id, step_id = %job.step_id, "job cancelled");

        self.update_run_progress(job.run_id).await?;
        self.dispatch(job.run_id, DispatchReason::Manual).await?;
        self.load_job(job_id).await
    }
}
