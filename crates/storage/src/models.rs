// Database models (internal, converted into the core domain types)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use autopilot_core::{
    JobCounts, JobMetadata, RunStatus, RunSummary, SocialAccount, SocialPost, Step, StoreError,
    WorkflowJob, WorkflowRun, WorkflowTemplate,
};

fn serialization<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Serialization(e.to_string())
}

// ============================================
// Templates
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub plan: String,
    pub campaign_types: Vec<String>,
    pub version: i32,
    pub steps: serde_json::Value,
    pub metadata: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for WorkflowTemplate {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let steps: Vec<Step> = serde_json::from_value(row.steps).map_err(serialization)?;
        Ok(WorkflowTemplate {
            id: row.id,
            slug: row.slug,
            name: row.name,
            description: row.description,
            plan: row.plan,
            campaign_types: row.campaign_types,
            version: row.version,
            steps,
            metadata: row.metadata,
            is_active: row.is_active,
        })
    }
}

// ============================================
// Runs
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub template_slug: String,
    pub status: String,
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for WorkflowRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status: RunStatus = row.status.parse().map_err(serialization)?;
        Ok(WorkflowRun {
            id: row.id,
            campaign_id: row.campaign_id,
            user_id: row.user_id,
            template_id: row.template_id,
            template_slug: row.template_slug,
            status,
            progress: row.progress,
            started_at: row.started_at,
            paused_at: row.paused_at,
            completed_at: row.completed_at,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A run joined with per-status job counts.
#[derive(Debug, Clone, FromRow)]
pub struct RunSummaryRow {
    #[sqlx(flatten)]
    pub run: RunRow,
    pub total_jobs: i64,
    pub pending_jobs: i64,
    pub queued_jobs: i64,
    pub running_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub cancelled_jobs: i64,
    pub skipped_jobs: i64,
}

impl TryFrom<RunSummaryRow> for RunSummary {
    type Error = StoreError;

    fn try_from(row: RunSummaryRow) -> Result<Self, Self::Error> {
        Ok(RunSummary {
            job_counts: JobCounts {
                total: row.total_jobs,
                pending: row.pending_jobs,
                queued: row.queued_jobs,
                running: row.running_jobs,
                completed: row.completed_jobs,
                failed: row.failed_jobs,
                cancelled: row.cancelled_jobs,
                skipped: row.skipped_jobs,
            },
            run: row.run.try_into()?,
        })
    }
}

// ============================================
// Jobs
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    pub queue_name: String,
    pub job_name: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for WorkflowJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let metadata: JobMetadata = serde_json::from_value(row.metadata).map_err(serialization)?;
        Ok(WorkflowJob {
            id: row.id,
            run_id: row.run_id,
            step_id: row.step_id,
            queue_name: row.queue_name,
            job_name: row.job_name,
            status: row.status.parse().map_err(serialization)?,
            payload: row.payload,
            result: row.result,
            error_message: row.error_message,
            attempts: row.attempts,
            scheduled_for: row.scheduled_for,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================
// Social
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SocialAccountRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    pub account_id: String,
    pub account_name: String,
    pub access_token: String,
    pub is_active: bool,
}

impl From<SocialAccountRow> for SocialAccount {
    fn from(row: SocialAccountRow) -> Self {
        SocialAccount {
            id: row.id,
            user_id: row.user_id,
            platform: row.platform,
            account_id: row.account_id,
            account_name: row.account_name,
            access_token: row.access_token,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SocialPostRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub platform: String,
    pub content: String,
    pub media: Vec<String>,
    pub status: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub platform_post_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SocialPostRow> for SocialPost {
    type Error = String;

    fn try_from(row: SocialPostRow) -> Result<Self, Self::Error> {
        Ok(SocialPost {
            id: row.id,
            user_id: row.user_id,
            campaign_id: row.campaign_id,
            platform: row.platform,
            content: row.content,
            media: row.media,
            status: row.status.parse()?,
            scheduled_for: row.scheduled_for,
            platform_post_id: row.platform_post_id,
            created_at: row.created_at,
        })
    }
}

/// Input for connecting a social account.
#[derive(Debug, Clone)]
pub struct CreateSocialAccount {
    pub user_id: Uuid,
    pub platform: String,
    pub account_id: String,
    pub account_name: String,
    pub access_token: String,
}
