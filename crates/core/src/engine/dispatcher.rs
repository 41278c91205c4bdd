// Dispatcher
//
// Resolves which jobs of a run are ready and hands them to the queue. Safe to
// invoke any number of times: only PENDING jobs are ever moved, and the move to
// QUEUED is one atomic batch in the store, so concurrent passes never enqueue
// the same job twice.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::WorkflowEngine;
use crate::error::{EngineError, Result};
use crate::job::{JobStatus, WorkflowJob};
use crate::run::RunStatus;
use crate::traits::EnqueueOptions;

/// Why a dispatch pass was triggered. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchReason {
    RunStarted,
    JobCompleted,
    JobFailed,
    Resumed,
    Manual,
}

impl std::fmt::Display for DispatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchReason::RunStarted => write!(f, "run-started"),
            DispatchReason::JobCompleted => write!(f, "job-completed"),
            DispatchReason::JobFailed => write!(f, "job-failed"),
            DispatchReason::Resumed => write!(f, "resumed"),
            DispatchReason::Manual => write!(f, "manual"),
        }
    }
}

/// What a dispatch pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Jobs moved to QUEUED and enqueued by this pass.
    pub queued: Vec<Uuid>,
    /// Jobs marked SKIPPED because a dependency can no longer complete.
    pub skipped: Vec<Uuid>,
    /// Terminal status set by finalization, if any.
    pub finalized: Option<RunStatus>,
    /// The run was paused or terminal and nothing was inspected.
    pub inactive: bool,
}

impl WorkflowEngine {
    /// Run one dispatch pass for a run.
    #[instrument(skip(self), fields(%run_id, %reason))]
    pub async fn dispatch(&self, run_id: Uuid, reason: DispatchReason) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let mut run = self.load_run(run_id).await?;

        if run.status == RunStatus::Pending {
            let mut active = run.clone();
            active.status = RunStatus::Active;
            active.started_at.get_or_insert_with(Utc::now);
            run = match self.store.update_run(&active, RunStatus::Pending).await? {
                Some(stored) => {
                    info!(%run_id, "workflow run started");
                    stored
                }
                None => self.load_run(run_id).await?,
            };
        }

        if run.status == RunStatus::Paused || run.status.is_terminal() {
            debug!(%run_id, status = %run.status, "run is not dispatchable");
            report.inactive = true;
            return Ok(report);
        }

        let mut jobs = self.store.list_jobs(run_id).await?;
        report.skipped = self.skip_unreachable_jobs(&mut jobs).await?;

        let ready = ready_jobs(&jobs);
        if ready.is_empty() {
            report.finalized = self.finalize_run_if_complete(run_id).await?;
            return Ok(report);
        }

        let moved = self.store.mark_jobs_queued(run_id, &ready).await?;
        let mut enqueue_error = None;
        for job in jobs.iter_mut().filter(|j| moved.contains(&j.id)) {
            job.status = JobStatus::Queued;
            match self.enqueue_job(job, EnqueueOptions::default()).await {
                Ok(task_id) => {
                    debug!(
                        job_id = %job.id,
                        step_id = %job.step_id,
                        queue = %job.queue_name,
                        job_name = %job.job_name,
                        %task_id,
                        "job enqueued"
                    );
                    report.queued.push(job.id);
                }
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        queue = %job.queue_name,
                        error = %e,
                        "enqueue failed, returning job to pending"
                    );
                    let mut pending = job.clone();
                    pending.status = JobStatus::Pending;
                    self.store.update_job(&pending, JobStatus::Queued).await?;
                    enqueue_error.get_or_insert(e);
                }
            }
        }

        // The caller's delivery fails so the queue redelivers it and the pass runs again.
        match enqueue_error {
            Some(e) => Err(EngineError::Queue(e)),
            None => Ok(report),
        }
    }

    /// Return jobs SKIPPED because of `step_id` to PENDING, following the
    /// chain of jobs skipped because of those. Called when `step_id` completes
    /// or is retried, before the next dispatch pass.
    pub(crate) async fn restore_skipped_dependents(
        &self,
        run_id: Uuid,
        step_id: &str,
    ) -> Result<Vec<Uuid>> {
        let jobs = self.store.list_jobs(run_id).await?;
        let mut restored = Vec::new();
        let mut causes = VecDeque::from([step_id.to_string()]);

        while let Some(cause) = causes.pop_front() {
            for job in jobs.iter().filter(|j| {
                j.status == JobStatus::Skipped
                    && j.metadata.skipped_for.as_deref() == Some(cause.as_str())
            }) {
                let mut pending = job.clone();
                pending.status = JobStatus::Pending;
                pending.error_message = None;
                pending.metadata.skipped_for = None;
                if self.store.update_job(&pending, JobStatus::Skipped).await? {
                    debug!(job_id = %job.id, step_id = %job.step_id, %cause, "skipped job restored");
                    restored.push(job.id);
                    causes.push_back(job.step_id.clone());
                }
            }
        }

        if !restored.is_empty() {
            info!(%run_id, %step_id, restored = restored.len(), "skipped dependents returned to pending");
        }
        Ok(restored)
    }

    /// Mark PENDING jobs whose dependencies can never complete as SKIPPED,
    /// repeating until no more jobs become unreachable.
    async fn skip_unreachable_jobs(&self, jobs: &mut Vec<WorkflowJob>) -> Result<Vec<Uuid>> {
        let mut skipped = Vec::new();
        // Each round skips at least one job, so the loop is bounded by the job count.
        for _ in 0..=jobs.len() {
            let unreachable = unreachable_jobs(jobs);
            if unreachable.is_empty() {
                break;
            }

            let mut changed = false;
            for (idx, dependency) in unreachable {
                let job = &jobs[idx];
                let mut next = job.clone();
                next.status = JobStatus::Skipped;
                next.error_message = Some(format!("dependency {} did not complete", dependency));
                next.metadata.skipped_for = Some(dependency.clone());
                if self.store.update_job(&next, JobStatus::Pending).await? {
                    debug!(job_id = %job.id, step_id = %job.step_id, %dependency, "job skipped");
                    skipped.push(job.id);
                    jobs[idx] = next;
                    changed = true;
                }
            }

            if !changed {
                // Every write lost a race; take the current rows and stop here.
                if let Some(run_id) = jobs.first().map(|j| j.run_id) {
                    *jobs = self.store.list_jobs(run_id).await?;
                }
                break;
            }
        }
        Ok(skipped)
    }
}

/// PENDING jobs whose dependencies are all COMPLETED, in creation order.
fn ready_jobs(jobs: &[WorkflowJob]) -> Vec<Uuid> {
    let by_step: HashMap<&str, &WorkflowJob> =
        jobs.iter().map(|j| (j.step_id.as_str(), j)).collect();

    jobs.iter()
        .filter(|job| job.status == JobStatus::Pending)
        .filter(|job| {
            job.metadata.depends_on.iter().all(|dep| {
                by_step
                    .get(dep.as_str())
                    .is_some_and(|d| d.status == JobStatus::Completed)
            })
        })
        .map(|job| job.id)
        .collect()
}

/// PENDING jobs with a missing or dead dependency, with the first such dependency.
fn unreachable_jobs(jobs: &[WorkflowJob]) -> Vec<(usize, String)> {
    let by_step: HashMap<&str, &WorkflowJob> =
        jobs.iter().map(|j| (j.step_id.as_str(), j)).collect();

    jobs.iter()
        .enumerate()
        .filter(|(_, job)| job.status == JobStatus::Pending)
        .filter_map(|(idx, job)| {
            job.metadata
                .depends_on
                .iter()
                .find(|dep| {
                    by_step
                        .get(dep.as_str())
                        .map_or(true, |d| d.is_dead_dependency())
                })
                .map(|dep| (idx, dep.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobMetadata;
    use serde_json::json;

    fn job(step: &str, status: JobStatus, deps: &[&str]) -> WorkflowJob {
        let now = Utc::now();
        WorkflowJob {
            id: Uuid::now_v7(),
            run_id: Uuid::nil(),
            step_id: step.to_string(),
            queue_name: "q".into(),
            job_name: "j".into(),
            status,
            payload: json!({}),
            result: None,
            error_message: None,
            attempts: 0,
            scheduled_for: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            metadata: JobMetadata::new(deps.iter().map(|d| d.to_string()).collect(), false),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_ready_requires_all_dependencies_completed() {
        let jobs = vec![
            job("a", JobStatus::Completed, &[]),
            job("b", JobStatus::Running, &["a"]),
            job("c", JobStatus::Pending, &["a"]),
            job("d", JobStatus::Pending, &["b", "c"]),
            job("e", JobStatus::Pending, &[]),
        ];
        let ready = ready_jobs(&jobs);
        assert_eq!(ready, vec![jobs[2].id, jobs[4].id]);
    }

    #[test]
    fn test_unreachable_detects_dead_and_missing_dependencies() {
        let mut failed = job("a", JobStatus::Failed, &[]);
        failed.metadata.continue_on_fail = true;
        let mut retrying = job("r", JobStatus::Failed, &[]);
        retrying.metadata.retry_scheduled = true;
        let jobs = vec![
            failed,
            retrying,
            job("b", JobStatus::Pending, &["a"]),
            job("c", JobStatus::Pending, &["r"]),
            job("d", JobStatus::Pending, &["ghost"]),
        ];
        let unreachable = unreachable_jobs(&jobs);
        assert_eq!(
            unreachable,
            vec![(2, "a".to_string()), (4, "ghost".to_string())]
        );
    }
}
