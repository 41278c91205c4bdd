// Workflow job domain types
//
// One job row per template step (plus synthetic publish jobs appended by the
// fan-out scheduler). Jobs are never deleted while their run exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Job execution status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    /// No further transition happens without an operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    /// States an operator may retry from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Engine bookkeeping stored alongside each job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct JobMetadata {
    /// Step ids that must be COMPLETED before this job is dispatched.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// A failure of this job does not fail the run.
    #[serde(default)]
    pub continue_on_fail: bool,
    /// The queue will redeliver this FAILED job; it still counts as in flight.
    #[serde(default)]
    pub retry_scheduled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error source chain of the last failure, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_details: Vec<String>,
    /// Step id of the dead dependency that got this job SKIPPED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_for: Option<String>,
    /// Retried by an operator after a failure; the next success is a recovery.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovering: bool,
}

impl JobMetadata {
    pub fn new(depends_on: Vec<String>, continue_on_fail: bool) -> Self {
        Self {
            depends_on,
            continue_on_fail,
            ..Default::default()
        }
    }

    /// Drop everything recorded by earlier attempts. `recovering` is kept.
    pub fn clear_failure(&mut self) {
        self.retry_scheduled = false;
        self.error_kind = None;
        self.error_details.clear();
        self.skipped_for = None;
    }
}

/// A concrete unit of work inside a run, one per template step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowJob {
    pub id: Uuid,
    pub run_id: Uuid,
    /// Template step id, or a synthetic `publish.<platform>.<account>.<post>` id.
    pub step_id: String,
    pub queue_name: String,
    pub job_name: String,
    pub status: JobStatus,
    /// Rendered payload delivered to the handler.
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowJob {
    /// A failure that blocks the run: FAILED, not tolerated and not awaiting redelivery.
    pub fn is_blocking_failure(&self) -> bool {
        self.status == JobStatus::Failed
            && !self.metadata.continue_on_fail
            && !self.metadata.retry_scheduled
    }

    /// Still owned by the queue or the dispatcher.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Pending | JobStatus::Queued | JobStatus::Running
        ) || (self.status == JobStatus::Failed && self.metadata.retry_scheduled)
    }

    /// A dependency in this state can never become COMPLETED without an operator.
    pub fn is_dead_dependency(&self) -> bool {
        match self.status {
            JobStatus::Cancelled | JobStatus::Skipped => true,
            JobStatus::Failed => !self.metadata.retry_scheduled,
            _ => false,
        }
    }
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub step_id: String,
    pub queue_name: String,
    pub job_name: String,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub metadata: JobMetadata,
}

/// Message placed on a queue for every job delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub workflow_job_id: Uuid,
    pub workflow_run_id: Uuid,
    pub payload: serde_json::Value,
}

impl JobEnvelope {
    pub fn for_job(job: &WorkflowJob) -> Self {
        Self {
            workflow_job_id: job.id,
            workflow_run_id: job.run_id,
            payload: job.payload.clone(),
        }
    }
}

/// Synthetic step id for one scheduled post on one account.
pub fn publish_step_id(platform: &str, account_id: &str, post_id: &str) -> String {
    format!("publish.{}.{}.{}", platform, account_id, post_id)
}
