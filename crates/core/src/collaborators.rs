// External collaborators used by job handlers and the fan-out scheduler
//
// Content generation, social platforms, scheduling advice, analytics and
// notifications are owned by other services. The engine only sees these traits.
// Decision: Collaborator errors carry a retry hint so handlers can classify them

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from external collaborators
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

// ============================================================================
// Content generation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub user_id: Uuid,
    /// "keywords", "content", "images", "outreach", "social_post"
    pub kind: String,
    pub topic: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub tokens_used: i64,
    #[serde(default)]
    pub cost: f64,
    /// Structured output, e.g. the keyword list.
    #[serde(default)]
    pub data: serde_json::Value,
}

#[async_trait]
pub trait GenerationService: Send + Sync + 'static {
    async fn generate(&self, request: GenerationRequest) -> CollaboratorResult<Generation>;
}

// ============================================================================
// Social platforms
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishRequest {
    pub text: String,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishReceipt {
    pub platform_post_id: String,
}

/// Publishes to a social platform on behalf of a connected account.
#[async_trait]
pub trait SocialPublisher: Send + Sync + 'static {
    async fn publish(
        &self,
        platform: &str,
        access_token: &str,
        account_id: &str,
        request: PublishRequest,
    ) -> CollaboratorResult<PublishReceipt>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostingAdvice {
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub reasoning: String,
}

/// Suggests when a user's audience on a platform is most active.
#[async_trait]
pub trait SchedulingAdvisor: Send + Sync + 'static {
    async fn optimal_posting_time(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> CollaboratorResult<PostingAdvice>;
}

/// Lifecycle of a social post record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SocialPostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl std::fmt::Display for SocialPostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocialPostStatus::Draft => write!(f, "draft"),
            SocialPostStatus::Scheduled => write!(f, "scheduled"),
            SocialPostStatus::Published => write!(f, "published"),
            SocialPostStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SocialPostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SocialPostStatus::Draft),
            "scheduled" => Ok(SocialPostStatus::Scheduled),
            "published" => Ok(SocialPostStatus::Published),
            "failed" => Ok(SocialPostStatus::Failed),
            other => Err(format!("unknown social post status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocialPost {
    pub id: Uuid,
    pub user_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub platform: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub status: SocialPostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub platform_post_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSocialPost {
    pub user_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub platform: String,
    pub content: String,
    pub media: Vec<String>,
}

/// A connected social account. Tokens never leave the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SocialAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    /// Account id on the platform.
    pub account_id: String,
    pub account_name: String,
    pub access_token: String,
    pub is_active: bool,
}

/// Read/write access to social posts and connected accounts.
#[async_trait]
pub trait SocialDirectory: Send + Sync + 'static {
    async fn get_post(&self, post_id: Uuid) -> CollaboratorResult<Option<SocialPost>>;

    async fn create_draft_post(&self, post: NewSocialPost) -> CollaboratorResult<SocialPost>;

    /// Active accounts of a user on one platform.
    async fn list_active_accounts(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> CollaboratorResult<Vec<SocialAccount>>;

    /// Look up an account by its platform-side id.
    async fn get_account(
        &self,
        user_id: Uuid,
        platform: &str,
        account_id: &str,
    ) -> CollaboratorResult<Option<SocialAccount>>;

    async fn mark_post_scheduled(
        &self,
        post_id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> CollaboratorResult<()>;

    async fn mark_post_published(
        &self,
        post_id: Uuid,
        platform_post_id: &str,
    ) -> CollaboratorResult<()>;
}

// ============================================================================
// Analytics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingSetup {
    pub tracking_id: String,
    #[serde(default)]
    pub goals: Vec<String>,
}

#[async_trait]
pub trait AnalyticsService: Send + Sync + 'static {
    async fn setup_tracking(
        &self,
        user_id: Uuid,
        campaign_id: Uuid,
        goals: Vec<String>,
    ) -> CollaboratorResult<TrackingSetup>;
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Failure,
    Recovery,
    Update,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Operator-facing event about a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowNotification {
    pub kind: NotificationKind,
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Delivers workflow notifications. Failures are logged by the caller and never
/// change workflow state.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: WorkflowNotification) -> CollaboratorResult<()>;
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: WorkflowNotification) -> CollaboratorResult<()> {
        match n.severity {
            Severity::Critical => tracing::error!(
                run_id = %n.run_id,
                job_id = ?n.job_id,
                kind = ?n.kind,
                "{}",
                n.message
            ),
            Severity::Warning => tracing::warn!(
                run_id = %n.run_id,
                job_id = ?n.job_id,
                kind = ?n.kind,
                "{}",
                n.message
            ),
            Severity::Info => tracing::info!(
                run_id = %n.run_id,
                job_id = ?n.job_id,
                kind = ?n.kind,
                "{}",
                n.message
            ),
        }
        Ok(())
    }
}
