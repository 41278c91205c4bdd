// Repository layer for database operations
// Templates / Runs / Jobs / Social accounts and posts

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use autopilot_core::{
    JobStatus, NewJob, NewRun, NewSocialPost, RunFilter, RunStatus, WorkflowJob, WorkflowRun,
    WorkflowTemplate,
};

use crate::models::*;

const TEMPLATE_COLUMNS: &str = "id, slug, name, description, plan, campaign_types, version, steps, metadata, is_active, created_at, updated_at";
const RUN_COLUMNS: &str = "id, campaign_id, user_id, template_id, template_slug, status, progress, started_at, paused_at, completed_at, metadata, created_at, updated_at";
const JOB_COLUMNS: &str = "id, run_id, step_id, queue_name, job_name, status, payload, result, error_message, attempts, scheduled_for, started_at, completed_at, failed_at, metadata, created_at, updated_at";
const POST_COLUMNS: &str = "id, user_id, campaign_id, platform, content, media, status, scheduled_for, platform_post_id, created_at";
const ACCOUNT_COLUMNS: &str = "id, user_id, platform, account_id, account_name, access_token, is_active";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    // ============================================
    // Templates
    // ============================================

    pub async fn get_template_by_slug(&self, slug: &str) -> Result<Option<TemplateRow>> {
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM workflow_templates WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_templates(&self) -> Result<Vec<TemplateRow>> {
        let rows = sqlx::query_as::<_, TemplateRow>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM workflow_templates ORDER BY slug"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Insert a template, or overwrite the one with the same slug.
    /// `version` is written as given; the caller decides whether it bumps.
    pub async fn save_template(
        &self,
        template: &WorkflowTemplate,
        version: i32,
    ) -> Result<TemplateRow> {
        let steps = serde_json::to_value(&template.steps)?;
        let row = sqlx::query_as::<_, TemplateRow>(&format!(
            r#"
            INSERT INTO workflow_templates (id, slug, name, description, plan, campaign_types, version, steps, metadata, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (slug) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                plan = EXCLUDED.plan,
                campaign_types = EXCLUDED.campaign_types,
                version = EXCLUDED.version,
                steps = EXCLUDED.steps,
                metadata = EXCLUDED.metadata,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&template.slug)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.plan)
        .bind(&template.campaign_types)
        .bind(version)
        .bind(&steps)
        .bind(&template.metadata)
        .bind(template.is_active)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Runs
    // ============================================

    /// Insert a run and its initial jobs in one transaction.
    pub async fn create_run(
        &self,
        input: NewRun,
        jobs: Vec<NewJob>,
    ) -> Result<(RunRow, Vec<JobRow>)> {
        let mut tx = self.pool.begin().await?;

        let run = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            INSERT INTO workflow_runs (id, campaign_id, user_id, template_id, template_slug, status, metadata)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(input.campaign_id)
        .bind(input.user_id)
        .bind(input.template_id)
        .bind(&input.template_slug)
        .bind(&input.metadata)
        .fetch_one(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(jobs.len());
        for job in jobs {
            created.push(insert_job(&mut *tx, run.id, job).await?);
        }

        tx.commit().await?;
        Ok((run, created))
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Option<RunRow>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_latest_run_for_campaign(&self, campaign_id: Uuid) -> Result<Option<RunRow>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM workflow_runs
            WHERE campaign_id = $1 AND status <> 'cancelled'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunSummaryRow>> {
        let rows = sqlx::query_as::<_, RunSummaryRow>(
            r#"
            SELECT
                r.id, r.campaign_id, r.user_id, r.template_id, r.template_slug, r.status,
                r.progress, r.started_at, r.paused_at, r.completed_at, r.metadata,
                r.created_at, r.updated_at,
                COUNT(j.id) AS total_jobs,
                COUNT(j.id) FILTER (WHERE j.status = 'pending') AS pending_jobs,
                COUNT(j.id) FILTER (WHERE j.status = 'queued') AS queued_jobs,
                COUNT(j.id) FILTER (WHERE j.status = 'running') AS running_jobs,
                COUNT(j.id) FILTER (WHERE j.status = 'completed') AS completed_jobs,
                COUNT(j.id) FILTER (WHERE j.status = 'failed') AS failed_jobs,
                COUNT(j.id) FILTER (WHERE j.status = 'cancelled') AS cancelled_jobs,
                COUNT(j.id) FILTER (WHERE j.status = 'skipped') AS skipped_jobs
            FROM workflow_runs r
            LEFT JOIN workflow_jobs j ON j.run_id = r.id
            WHERE ($1::uuid IS NULL OR r.user_id = $1)
              AND ($2::text IS NULL OR r.status = $2)
            GROUP BY r.id
            ORDER BY r.created_at DESC, r.id DESC
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.status.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Write the mutable run columns if the row still has `expected` status
    /// and the `updated_at` the caller loaded. `updated_at` always moves forward.
    pub async fn update_run_if(
        &self,
        run: &WorkflowRun,
        expected: RunStatus,
    ) -> Result<Option<RunRow>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            UPDATE workflow_runs
            SET status = $4,
                progress = $5,
                started_at = $6,
                paused_at = $7,
                completed_at = $8,
                metadata = $9,
                updated_at = GREATEST(NOW(), $3 + interval '1 microsecond')
            WHERE id = $1 AND status = $2 AND updated_at = $3
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run.id)
        .bind(expected.to_string())
        .bind(run.updated_at)
        .bind(run.status.to_string())
        .bind(run.progress)
        .bind(run.started_at)
        .bind(run.paused_at)
        .bind(run.completed_at)
        .bind(&run.metadata)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Jobs
    // ============================================

    pub async fn create_job(&self, run_id: Uuid, job: NewJob) -> Result<JobRow> {
        let mut conn = self.pool.acquire().await?;
        insert_job(&mut *conn, run_id, job).await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM workflow_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_jobs(&self, run_id: Uuid) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM workflow_jobs WHERE run_id = $1 ORDER BY seq"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Write the mutable job columns if the stored status is `expected`.
    pub async fn update_job_if(&self, job: &WorkflowJob, expected: JobStatus) -> Result<bool> {
        let metadata = serde_json::to_value(&job.metadata)?;
        let result = sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = $3,
                payload = $4,
                result = $5,
                error_message = $6,
                attempts = $7,
                scheduled_for = $8,
                started_at = $9,
                completed_at = $10,
                failed_at = $11,
                metadata = $12,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(job.id)
        .bind(expected.to_string())
        .bind(job.status.to_string())
        .bind(&job.payload)
        .bind(&job.result)
        .bind(&job.error_message)
        .bind(job.attempts)
        .bind(job.scheduled_for)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn job_exists(&self, id: Uuid) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM workflow_jobs WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Move PENDING jobs to QUEUED, returning only the ids this statement moved.
    pub async fn mark_jobs_queued(&self, run_id: Uuid, job_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if job_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE workflow_jobs
            SET status = 'queued', updated_at = NOW()
            WHERE run_id = $1 AND id = ANY($2) AND status = 'pending'
            RETURNING id
            "#,
        )
        .bind(run_id)
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    // ============================================
    // Social accounts
    // ============================================

    pub async fn create_social_account(
        &self,
        input: CreateSocialAccount,
    ) -> Result<SocialAccountRow> {
        let row = sqlx::query_as::<_, SocialAccountRow>(&format!(
            r#"
            INSERT INTO social_accounts (id, user_id, platform, account_id, account_name, access_token)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, platform, account_id) DO UPDATE SET
                account_name = EXCLUDED.account_name,
                access_token = EXCLUDED.access_token,
                is_active = TRUE,
                updated_at = NOW()
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(&input.platform)
        .bind(&input.account_id)
        .bind(&input.account_name)
        .bind(&input.access_token)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_active_social_accounts(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> Result<Vec<SocialAccountRow>> {
        let rows = sqlx::query_as::<_, SocialAccountRow>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM social_accounts
            WHERE user_id = $1 AND platform = $2 AND is_active
            ORDER BY created_at
            "#
        ))
        .bind(user_id)
        .bind(platform)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_social_account(
        &self,
        user_id: Uuid,
        platform: &str,
        account_id: &str,
    ) -> Result<Option<SocialAccountRow>> {
        let row = sqlx::query_as::<_, SocialAccountRow>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM social_accounts
            WHERE user_id = $1 AND platform = $2 AND account_id = $3
            "#
        ))
        .bind(user_id)
        .bind(platform)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Social posts
    // ============================================

    pub async fn create_draft_post(&self, input: NewSocialPost) -> Result<SocialPostRow> {
        let row = sqlx::query_as::<_, SocialPostRow>(&format!(
            r#"
            INSERT INTO social_posts (id, user_id, campaign_id, platform, content, media, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'draft')
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(input.campaign_id)
        .bind(&input.platform)
        .bind(&input.content)
        .bind(&input.media)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_social_post(&self, id: Uuid) -> Result<Option<SocialPostRow>> {
        let row = sqlx::query_as::<_, SocialPostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM social_posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn mark_post_scheduled(
        &self,
        id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE social_posts
            SET status = 'scheduled', scheduled_for = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(scheduled_for)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_post_published(&self, id: Uuid, platform_post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE social_posts
            SET status = 'published', platform_post_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(platform_post_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn insert_job(
    conn: &mut sqlx::PgConnection,
    run_id: Uuid,
    job: NewJob,
) -> Result<JobRow> {
    let metadata = serde_json::to_value(&job.metadata)?;
    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        INSERT INTO workflow_jobs (id, run_id, step_id, queue_name, job_name, status, payload, scheduled_for, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(Uuid::now_v7())
    .bind(run_id)
    .bind(&job.step_id)
    .bind(&job.queue_name)
    .bind(&job.job_name)
    .bind(job.status.to_string())
    .bind(&job.payload)
    .bind(job.scheduled_for)
    .bind(&metadata)
    .fetch_one(conn)
    .await?;

    Ok(row)
}
