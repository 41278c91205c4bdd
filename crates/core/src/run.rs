// Workflow run domain types
//
// A run is one execution of a template against one campaign. Its progress is
// always recomputed from persisted job rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::job::{JobStatus, WorkflowJob};

/// Run execution status.
/// - `pending`: created, not yet dispatched
/// - `active`: dispatching jobs
/// - `paused`: dispatch suspended by an operator
/// - `completed`: every job reached a completed (or tolerated) terminal state
/// - `failed`: a non-tolerated job failed
/// - `cancelled`: stopped by an administrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Completed, failed and cancelled runs never dispatch again on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Active => write!(f, "active"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "active" => Ok(RunStatus::Active),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// One execution of a workflow template for a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowRun {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// Owning user. Gates control API access for non-admins.
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub template_slug: String,
    pub status: RunStatus,
    /// completed jobs / total jobs, in [0, 1].
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form key/value data: start inputs, accumulated handler output, job counters.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Merge top-level keys into the metadata object.
    pub fn merge_metadata(&mut self, patch: serde_json::Map<String, serde_json::Value>) {
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(Default::default());
        }
        if let Some(obj) = self.metadata.as_object_mut() {
            obj.extend(patch);
        }
    }

    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        let mut patch = serde_json::Map::new();
        patch.insert(key.to_string(), value);
        self.merge_metadata(patch);
    }
}

/// Input for creating a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub template_slug: String,
    pub metadata: serde_json::Value,
}

/// Per-status job counts for a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct JobCounts {
    pub total: i64,
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub skipped: i64,
}

impl JobCounts {
    pub fn from_jobs(jobs: &[WorkflowJob]) -> Self {
        let mut counts = JobCounts {
            total: jobs.len() as i64,
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
                JobStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// A run annotated with its job counts, as returned by list queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RunSummary {
    #[serde(flatten)]
    pub run: WorkflowRun,
    pub job_counts: JobCounts,
}

/// A run with all of its jobs in creation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: WorkflowRun,
    pub jobs: Vec<WorkflowJob>,
}

/// Filter for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Restrict to one owner. `None` lists every user's runs.
    pub user_id: Option<Uuid>,
    pub status: Option<RunStatus>,
}
