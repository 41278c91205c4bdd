// Publish fan-out scheduler
//
// Appends one publish job per (post, connected account) to the run's job set
// while the calendar job is still RUNNING. Synthetic step ids make the append
// idempotent across calendar job retries.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::WorkflowEngine;
use crate::handler::{HandlerError, PublishTarget};
use crate::job::{publish_step_id, JobMetadata, JobStatus, NewJob};
use crate::run::WorkflowRun;
use crate::traits::EnqueueOptions;

/// Scheduling outcome for one post.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FanOutSummary {
    pub platform: String,
    pub post_id: Uuid,
    /// Publish jobs created and enqueued.
    pub scheduled: usize,
    /// Accounts that already had a publish job for this post.
    #[serde(default)]
    pub already_scheduled: usize,
    /// Publish jobs created but not enqueued (left FAILED).
    #[serde(default)]
    pub enqueue_failed: usize,
    #[serde(default)]
    pub job_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FanOutSummary {
    fn new(target: &PublishTarget) -> Self {
        Self {
            platform: target.platform.clone(),
            post_id: target.post_id,
            ..Default::default()
        }
    }

    fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

impl WorkflowEngine {
    /// Create and enqueue publish jobs for every target across the run owner's
    /// active accounts on the target's platform.
    #[instrument(skip(self, run, targets), fields(run_id = %run.id, targets = targets.len()))]
    pub async fn fan_out_publish(
        &self,
        run: &WorkflowRun,
        targets: &[PublishTarget],
    ) -> Result<Vec<FanOutSummary>, HandlerError> {
        let deps = self
            .fan_out
            .as_ref()
            .ok_or_else(|| HandlerError::internal("publish fan-out is not configured"))?;

        let mut existing: HashSet<String> = self
            .store
            .list_jobs(run.id)
            .await?
            .into_iter()
            .map(|j| j.step_id)
            .collect();

        let mut summaries = Vec::with_capacity(targets.len());
        for target in targets {
            let mut summary = FanOutSummary::new(target);

            if deps.directory.get_post(target.post_id).await?.is_none() {
                warn!(post_id = %target.post_id, "social post not found, nothing to schedule");
                summaries.push(summary.with_note("post not found"));
                continue;
            }

            let accounts = deps
                .directory
                .list_active_accounts(run.user_id, &target.platform)
                .await?;
            if accounts.is_empty() {
                info!(
                    platform = %target.platform,
                    post_id = %target.post_id,
                    "no connected accounts, post stays in draft"
                );
                summaries.push(summary.with_note("no connected accounts"));
                continue;
            }

            for account in accounts {
                let step_id = publish_step_id(
                    &target.platform,
                    &account.account_id,
                    &target.post_id.to_string(),
                );
                if existing.contains(&step_id) {
                    summary.already_scheduled += 1;
                    continue;
                }

                let publish_at = match deps
                    .advisor
                    .optimal_posting_time(run.user_id, &target.platform)
                    .await
                {
                    Ok(advice) => advice.datetime,
                    Err(e) => {
                        warn!(
                            platform = %target.platform,
                            error = %e,
                            "scheduling advice unavailable, publishing now"
                        );
                        Utc::now()
                    }
                };

                deps.directory
                    .mark_post_scheduled(target.post_id, publish_at)
                    .await?;

                let job = self
                    .store
                    .create_job(
                        run.id,
                        NewJob {
                            step_id: step_id.clone(),
                            queue_name: self.config.social_queue.clone(),
                            job_name: self.config.publish_job_name.clone(),
                            status: JobStatus::Queued,
                            payload: json!({
                                "post_id": target.post_id,
                                "platform": target.platform,
                                "account_id": account.account_id,
                                "campaign_id": run.campaign_id,
                                "user_id": run.user_id,
                            }),
                            scheduled_for: Some(publish_at),
                            metadata: JobMetadata::new(vec![], true),
                        },
                    )
                    .await?;
                existing.insert(step_id);

                // The job set grew, so the ratio changes.
                self.update_run_progress(run.id).await?;

                let delay = (publish_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                match self.enqueue_job(&job, EnqueueOptions::delayed(delay)).await {
                    Ok(_) => {
                        summary.scheduled += 1;
                        summary.job_ids.push(job.id);
                    }
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "failed to enqueue publish job");
                        let mut failed = job.clone();
                        failed.status = JobStatus::Failed;
                        failed.error_message = Some(format!("publish enqueue failed: {}", e));
                        failed.failed_at = Some(Utc::now());
                        self.store.update_job(&failed, JobStatus::Queued).await?;
                        summary.enqueue_failed += 1;
                    }
                }
            }

            info!(
                platform = %target.platform,
                post_id = %target.post_id,
                scheduled = summary.scheduled,
                "publish jobs scheduled"
            );
            summaries.push(summary);
        }

        Ok(summaries)
    }
}
