// Progress and finalization tracker
//
// Run progress and job counters are always recomputed from a fresh read of the
// run's job rows. Terminal transitions happen here and nowhere else, except the
// immediate FAILED transition on a non-tolerated job failure.
// Decision: A settled run whose only failures are tolerated finishes COMPLETED with
// completed_with_failures metadata instead of waiting forever

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::WorkflowEngine;
use crate::collaborators::{NotificationKind, Severity, WorkflowNotification};
use crate::error::{EngineError, Result};
use crate::job::{JobStatus, WorkflowJob};
use crate::run::{JobCounts, RunStatus, WorkflowRun};

/// Write the job counters into run metadata.
fn apply_counts(run: &mut WorkflowRun, counts: &JobCounts) {
    run.progress = counts.progress();
    run.set_metadata("total_jobs", json!(counts.total));
    run.set_metadata("completed_jobs", json!(counts.completed));
    run.set_metadata("failed_jobs", json!(counts.failed));
}

impl WorkflowEngine {
    /// Recompute progress and counters. Flips the run to COMPLETED when every
    /// job is COMPLETED. Returns the stored run.
    #[instrument(skip(self), fields(%run_id))]
    pub async fn update_run_progress(&self, run_id: Uuid) -> Result<WorkflowRun> {
        for attempt in 1..=self.config.max_cas_attempts {
            let run = self.load_run(run_id).await?;
            let jobs = self.store.list_jobs(run_id).await?;
            let counts = JobCounts::from_jobs(&jobs);

            let mut next = run.clone();
            apply_counts(&mut next, &counts);

            let completing = counts.total > 0
                && counts.completed == counts.total
                && matches!(
                    run.status,
                    RunStatus::Pending | RunStatus::Active | RunStatus::Paused
                );
            if completing {
                next.status = RunStatus::Completed;
                next.progress = 1.0;
                next.completed_at = Some(Utc::now());
            }

            if let Some(stored) = self.store.update_run(&next, run.status).await? {
                if completing {
                    info!(%run_id, total_jobs = counts.total, "workflow run completed");
                    self.notify_run_finished(&stored, RunStatus::Completed, &counts)
                        .await;
                }
                return Ok(stored);
            }
            debug!(%run_id, attempt, "run changed concurrently, retrying progress update");
        }

        Err(EngineError::conflict(format!(
            "progress update for run {} kept conflicting",
            run_id
        )))
    }

    /// Move a settled run to its terminal status. A run is settled when no job
    /// is PENDING, QUEUED, RUNNING or FAILED awaiting a queue retry. Returns the
    /// status set, or `None` when the run is not settled or not dispatchable.
    #[instrument(skip(self), fields(%run_id))]
    pub async fn finalize_run_if_complete(&self, run_id: Uuid) -> Result<Option<RunStatus>> {
        for attempt in 1..=self.config.max_cas_attempts {
            let run = self.load_run(run_id).await?;
            if !matches!(run.status, RunStatus::Pending | RunStatus::Active) {
                return Ok(None);
            }

            let jobs = self.store.list_jobs(run_id).await?;
            if jobs.iter().any(WorkflowJob::is_in_flight) {
                return Ok(None);
            }

            let counts = JobCounts::from_jobs(&jobs);
            let blocking = jobs.iter().filter(|j| j.is_blocking_failure()).count();
            let tolerated = jobs
                .iter()
                .filter(|j| j.status == JobStatus::Failed && j.metadata.continue_on_fail)
                .count();

            let mut next = run.clone();
            apply_counts(&mut next, &counts);
            next.completed_at = Some(Utc::now());
            if blocking > 0 {
                next.status = RunStatus::Failed;
            } else {
                next.status = RunStatus::Completed;
                if counts.completed < counts.total {
                    next.set_metadata("completed_with_failures", json!(true));
                    next.set_metadata("tolerated_failures", json!(tolerated));
                    next.set_metadata("skipped_jobs", json!(counts.skipped));
                }
            }

            if let Some(stored) = self.store.update_run(&next, run.status).await? {
                if stored.status == RunStatus::Failed {
                    warn!(%run_id, blocking, "workflow run failed");
                } else {
                    info!(
                        %run_id,
                        tolerated,
                        skipped = counts.skipped,
                        "workflow run completed"
                    );
                }
                self.notify_run_finished(&stored, stored.status, &counts)
                    .await;
                return Ok(Some(stored.status));
            }
            debug!(%run_id, attempt, "run changed concurrently, retrying finalization");
        }

        Err(EngineError::conflict(format!(
            "finalization of run {} kept conflicting",
            run_id
        )))
    }

    /// Mark a run FAILED because a non-tolerated job failed.
    pub(super) async fn mark_run_failed(&self, run_id: Uuid, job: &WorkflowJob) -> Result<()> {
        for _ in 0..self.config.max_cas_attempts {
            let run = self.load_run(run_id).await?;
            if run.status.is_terminal() {
                return Ok(());
            }
            let mut failed = run.clone();
            failed.status = RunStatus::Failed;
            failed.completed_at = Some(Utc::now());
            failed.set_metadata("failed_step", json!(job.step_id));
            if self.store.update_run(&failed, run.status).await?.is_some() {
                warn!(%run_id, step_id = %job.step_id, "workflow run failed");
                return Ok(());
            }
        }
        Err(EngineError::conflict(format!(
            "could not mark run {} failed",
            run_id
        )))
    }

    /// Reopen a FAILED run to ACTIVE once no blocking failure remains.
    /// Returns whether the run was reopened.
    pub(super) async fn reopen_run_if_recovered(&self, run_id: Uuid) -> Result<bool> {
        for _ in 0..self.config.max_cas_attempts {
            let run = self.load_run(run_id).await?;
            if run.status != RunStatus::Failed {
                return Ok(false);
            }
            let jobs = self.store.list_jobs(run_id).await?;
            if jobs.iter().any(WorkflowJob::is_blocking_failure) {
                return Ok(false);
            }
            let mut reopened = run.clone();
            reopen(&mut reopened);
            if self
                .store
                .update_run(&reopened, RunStatus::Failed)
                .await?
                .is_some()
            {
                info!(%run_id, "workflow run recovered");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Merge a metadata patch into the run, whatever its status.
    pub(super) async fn merge_run_metadata(
        &self,
        run_id: Uuid,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        for _ in 0..self.config.max_cas_attempts {
            let run = self.load_run(run_id).await?;
            let mut next = run.clone();
            next.merge_metadata(patch.clone());
            if self.store.update_run(&next, run.status).await?.is_some() {
                return Ok(());
            }
        }
        Err(EngineError::conflict(format!(
            "metadata merge for run {} kept conflicting",
            run_id
        )))
    }

    async fn notify_run_finished(&self, run: &WorkflowRun, status: RunStatus, counts: &JobCounts) {
        let severity = if status == RunStatus::Failed {
            Severity::Critical
        } else {
            Severity::Info
        };
        self.notify(WorkflowNotification {
            kind: NotificationKind::Update,
            run_id: run.id,
            job_id: None,
            campaign_name: run.metadata_str("campaign_name"),
            user_email: run.metadata_str("user_email"),
            message: format!(
                "workflow run {}: {}/{} jobs completed, {} failed",
                status, counts.completed, counts.total, counts.failed
            ),
            severity,
            error_kind: None,
        })
        .await;
    }
}

/// Put a finished run back into ACTIVE.
pub(super) fn reopen(run: &mut WorkflowRun) {
    run.status = RunStatus::Active;
    run.completed_at = None;
    if let Some(meta) = run.metadata.as_object_mut() {
        meta.remove("failed_step");
        meta.remove("completed_with_failures");
        meta.remove("tolerated_failures");
        meta.remove("skipped_jobs");
    }
}
