// Job delivery lifecycle
//
// Every queue delivery of a job runs through execute_delivery:
//   guard -> RUNNING (compare-and-set) -> handler -> COMPLETED | FAILED
// followed by progress, notifications and the next dispatch pass. Handler
// errors are returned after bookkeeping so the queue applies its own retry
// and dead-letter accounting.
// Decision: A failure the queue will retry keeps the run open; only a final
// failure of a non-tolerated job fails the run

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::{DispatchReason, WorkflowEngine};
use crate::collaborators::{NotificationKind, Severity, WorkflowNotification};
use crate::handler::{HandlerError, JobContext, JobHandler, JobOutput};
use crate::job::{JobEnvelope, JobStatus, WorkflowJob};
use crate::run::{RunStatus, WorkflowRun};

/// Queue-side facts about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// 1-based attempt number as counted by the queue.
    pub attempt: u32,
    /// Attempts the queue allows before dead-lettering.
    pub max_attempts: u32,
}

impl Delivery {
    pub fn first() -> Self {
        Self {
            attempt: 1,
            max_attempts: 1,
        }
    }

    /// Whether the queue will deliver again after a failure of this attempt.
    pub fn has_retries_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// What happened to a delivery that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler ran and the job is COMPLETED.
    Completed,
    /// Job was already COMPLETED; dispatch was re-run instead.
    AlreadyCompleted,
    /// Job row or run no longer exists.
    Missing,
    /// Job is in a state that takes no deliveries.
    Ignored(JobStatus),
    /// Run was cancelled; the job was marked CANCELLED.
    Cancelled,
    /// Another delivery or an operator changed the job first.
    Superseded,
}

impl WorkflowEngine {
    /// Execute one delivery of a job envelope with `handler`.
    #[instrument(
        skip(self, handler, envelope),
        fields(job_id = %envelope.workflow_job_id, run_id = %envelope.workflow_run_id, attempt = delivery.attempt)
    )]
    pub async fn execute_delivery(
        &self,
        handler: &dyn JobHandler,
        envelope: JobEnvelope,
        delivery: Delivery,
    ) -> Result<DeliveryOutcome, HandlerError> {
        let Some(job) = self.store.get_job(envelope.workflow_job_id).await? else {
            warn!("delivery for unknown job, acknowledging");
            return Ok(DeliveryOutcome::Missing);
        };

        match job.status {
            JobStatus::Completed => {
                debug!("job already completed, re-running dispatch");
                self.dispatch(job.run_id, DispatchReason::JobCompleted)
                    .await?;
                return Ok(DeliveryOutcome::AlreadyCompleted);
            }
            JobStatus::Failed if !job.metadata.retry_scheduled => {
                debug!("job failed without a scheduled retry, ignoring delivery");
                return Ok(DeliveryOutcome::Ignored(job.status));
            }
            JobStatus::Pending | JobStatus::Cancelled | JobStatus::Skipped => {
                debug!(status = %job.status, "job takes no deliveries, ignoring");
                return Ok(DeliveryOutcome::Ignored(job.status));
            }
            JobStatus::Queued | JobStatus::Running | JobStatus::Failed => {}
        }

        let Some(run) = self.store.get_run(job.run_id).await? else {
            warn!("delivery for job of unknown run, acknowledging");
            return Ok(DeliveryOutcome::Missing);
        };

        if run.status == RunStatus::Cancelled {
            let mut cancelled = job.clone();
            cancelled.status = JobStatus::Cancelled;
            cancelled.error_message = Some("run cancelled".to_string());
            self.store.update_job(&cancelled, job.status).await?;
            info!("run is cancelled, job cancelled without executing");
            return Ok(DeliveryOutcome::Cancelled);
        }

        let previous_status = job.status;
        let mut running = job.clone();
        running.status = JobStatus::Running;
        running.attempts += 1;
        running.started_at = Some(Utc::now());
        running.metadata.retry_scheduled = false;
        if !self.store.update_job(&running, previous_status).await? {
            debug!("job changed before it could start, dropping duplicate delivery");
            return Ok(DeliveryOutcome::Superseded);
        }

        let ctx = JobContext {
            run_id: run.id,
            job_id: job.id,
            step_id: job.step_id.clone(),
            user_id: run.user_id,
            campaign_id: run.campaign_id,
            attempt: delivery.attempt,
            run_metadata: run.metadata.clone(),
        };

        debug!(step_id = %job.step_id, job_name = %job.job_name, "executing job");
        let executed = match handler.execute(&ctx, envelope.payload).await {
            Ok(output) => self.apply_publish_fan_out(&run, output).await,
            Err(e) => Err(e),
        };

        match executed {
            Ok((result, output)) => {
                self.complete_job(running, previous_status, result, output)
                    .await
            }
            Err(err) => {
                self.fail_job(running, &run, &err, delivery).await;
                Err(err)
            }
        }
    }

    /// Run the fan-out scheduler for the handler's publish targets and attach
    /// the per-post summaries to the job result.
    async fn apply_publish_fan_out(
        &self,
        run: &WorkflowRun,
        output: JobOutput,
    ) -> Result<(serde_json::Value, JobOutput), HandlerError> {
        if output.publish_targets.is_empty() {
            return Ok((output.result.clone(), output));
        }

        let summaries = self.fan_out_publish(run, &output.publish_targets).await?;
        let schedule = serde_json::to_value(&summaries)
            .map_err(|e| HandlerError::internal(e.to_string()).with_source(e))?;
        let result = match output.result.clone() {
            serde_json::Value::Object(mut map) => {
                map.insert("publish_schedule".to_string(), schedule);
                serde_json::Value::Object(map)
            }
            serde_json::Value::Null => json!({ "publish_schedule": schedule }),
            other => json!({ "value": other, "publish_schedule": schedule }),
        };
        Ok((result, output))
    }

    async fn complete_job(
        &self,
        running: WorkflowJob,
        previous_status: JobStatus,
        result: serde_json::Value,
        output: JobOutput,
    ) -> Result<DeliveryOutcome, HandlerError> {
        let run_id = running.run_id;
        let recovered = previous_status == JobStatus::Failed || running.metadata.recovering;

        self.merge_run_metadata(run_id, output.run_metadata).await?;

        let mut completed = running.clone();
        completed.status = JobStatus::Completed;
        completed.result = Some(result);
        completed.error_message = None;
        completed.completed_at = Some(Utc::now());
        completed.failed_at = None;
        completed.metadata.clear_failure();
        completed.metadata.recovering = false;
        if !self
            .store
            .update_job(&completed, JobStatus::Running)
            .await?
        {
            warn!(job_id = %running.id, "job changed while running, result discarded");
            return Ok(DeliveryOutcome::Superseded);
        }
        info!(job_id = %completed.id, step_id = %completed.step_id, "job completed");

        self.restore_skipped_dependents(run_id, &completed.step_id)
            .await?;
        let run = self.update_run_progress(run_id).await?;

        if recovered {
            self.notify(WorkflowNotification {
                kind: NotificationKind::Recovery,
                run_id,
                job_id: Some(completed.id),
                campaign_name: run.metadata_str("campaign_name"),
                user_email: run.metadata_str("user_email"),
                message: format!(
                    "job {} ({}) recovered after {} attempts",
                    completed.step_id, completed.job_name, completed.attempts
                ),
                severity: Severity::Info,
                error_kind: None,
            })
            .await;
            self.reopen_run_if_recovered(run_id).await?;
        }

        self.dispatch(run_id, DispatchReason::JobCompleted).await?;
        Ok(DeliveryOutcome::Completed)
    }

    /// Record a handler failure. Bookkeeping errors are logged, never returned,
    /// so the caller always re-raises the handler's own error.
    async fn fail_job(
        &self,
        running: WorkflowJob,
        run: &WorkflowRun,
        err: &HandlerError,
        delivery: Delivery,
    ) {
        let run_id = running.run_id;
        let continue_on_fail = running.metadata.continue_on_fail;
        let retry_scheduled = delivery.has_retries_left() && err.is_retryable();

        let mut failed = running.clone();
        failed.status = JobStatus::Failed;
        failed.error_message = Some(err.message.clone());
        failed.failed_at = Some(Utc::now());
        failed.metadata.retry_scheduled = retry_scheduled;
        failed.metadata.error_kind = Some(err.kind.as_str().to_string());
        failed.metadata.error_details = err.chain();

        match self.store.update_job(&failed, JobStatus::Running).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(job_id = %running.id, "job changed while running, failure not recorded");
                return;
            }
            Err(e) => {
                error!(job_id = %running.id, error = %e, "failed to record job failure");
                return;
            }
        }
        warn!(
            job_id = %failed.id,
            step_id = %failed.step_id,
            kind = %err.kind,
            retry_scheduled,
            error = %err,
            "job failed"
        );

        if let Err(e) = self.update_run_progress(run_id).await {
            error!(%run_id, error = %e, "failed to update run progress");
        }

        let severity = if continue_on_fail {
            Severity::Warning
        } else {
            Severity::Critical
        };
        let suffix = if retry_scheduled {
            " (retry scheduled)"
        } else {
            ""
        };
        self.notify(WorkflowNotification {
            kind: NotificationKind::Failure,
            run_id,
            job_id: Some(failed.id),
            campaign_name: run.metadata_str("campaign_name"),
            user_email: run.metadata_str("user_email"),
            message: format!(
                "job {} ({}) failed: {}{}",
                failed.step_id, failed.job_name, err.message, suffix
            ),
            severity,
            error_kind: Some(err.kind.as_str().to_string()),
        })
        .await;

        if continue_on_fail {
            if let Err(e) = self.dispatch(run_id, DispatchReason::JobFailed).await {
                error!(%run_id, error = %e, "dispatch after tolerated failure failed");
            }
        } else if retry_scheduled {
            debug!(%run_id, "awaiting queue retry before failing the run");
        } else if let Err(e) = self.mark_run_failed(run_id, &failed).await {
            error!(%run_id, error = %e, "failed to mark run failed");
        }
    }
}
