// Database-backed WorkflowStore implementation
//
// Repository calls return anyhow errors; this adapter maps them into the
// engine's StoreError and converts rows into domain types.

use async_trait::async_trait;
use tracing::{debug, instrument};
use uuid::Uuid;

use autopilot_core::{
    JobStatus, NewJob, NewRun, RunFilter, RunStatus, RunSummary, StoreError, StoreResult,
    WorkflowJob, WorkflowRun, WorkflowStore, WorkflowTemplate,
};

use crate::repositories::Database;

fn db_error(e: anyhow::Error) -> StoreError {
    StoreError::Database(format!("{:#}", e))
}

/// Postgres workflow store
#[derive(Clone)]
pub struct DbWorkflowStore {
    db: Database,
}

impl DbWorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WorkflowStore for DbWorkflowStore {
    #[instrument(skip(self, templates), fields(count = templates.len()))]
    async fn upsert_templates(
        &self,
        templates: Vec<WorkflowTemplate>,
    ) -> StoreResult<Vec<WorkflowTemplate>> {
        let mut stored = Vec::with_capacity(templates.len());
        for template in templates {
            let existing = self
                .db
                .get_template_by_slug(&template.slug)
                .await
                .map_err(db_error)?
                .map(WorkflowTemplate::try_from)
                .transpose()?;

            let version = match &existing {
                Some(current) if current.same_definition(&template) => {
                    stored.push(current.clone());
                    continue;
                }
                Some(current) => current.version + 1,
                None => template.version.max(1),
            };

            let row = self
                .db
                .save_template(&template, version)
                .await
                .map_err(db_error)?;
            debug!(slug = %row.slug, version, "template saved");
            stored.push(row.try_into()?);
        }
        Ok(stored)
    }

    async fn list_templates(&self) -> StoreResult<Vec<WorkflowTemplate>> {
        self.db
            .list_templates()
            .await
            .map_err(db_error)?
            .into_iter()
            .map(WorkflowTemplate::try_from)
            .collect()
    }

    #[instrument(skip(self, run, jobs), fields(campaign_id = %run.campaign_id, jobs = jobs.len()))]
    async fn create_run(
        &self,
        run: NewRun,
        jobs: Vec<NewJob>,
    ) -> StoreResult<(WorkflowRun, Vec<WorkflowJob>)> {
        let (run, jobs) = self.db.create_run(run, jobs).await.map_err(db_error)?;
        let jobs = jobs
            .into_iter()
            .map(WorkflowJob::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((run.try_into()?, jobs))
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>> {
        self.db
            .get_run(run_id)
            .await
            .map_err(db_error)?
            .map(WorkflowRun::try_from)
            .transpose()
    }

    async fn find_existing_run_for_campaign(
        &self,
        campaign_id: Uuid,
    ) -> StoreResult<Option<WorkflowRun>> {
        self.db
            .find_latest_run_for_campaign(campaign_id)
            .await
            .map_err(db_error)?
            .map(WorkflowRun::try_from)
            .transpose()
    }

    async fn list_runs(&self, filter: RunFilter) -> StoreResult<Vec<RunSummary>> {
        self.db
            .list_runs(&filter)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(RunSummary::try_from)
            .collect()
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, to = %run.status))]
    async fn update_run(
        &self,
        run: &WorkflowRun,
        expected: RunStatus,
    ) -> StoreResult<Option<WorkflowRun>> {
        match self.db.update_run_if(run, expected).await.map_err(db_error)? {
            Some(row) => Ok(Some(row.try_into()?)),
            None => {
                if self.db.get_run(run.id).await.map_err(db_error)?.is_none() {
                    return Err(StoreError::RunNotFound(run.id));
                }
                debug!(%expected, "run update lost compare-and-set");
                Ok(None)
            }
        }
    }

    async fn create_job(&self, run_id: Uuid, job: NewJob) -> StoreResult<WorkflowJob> {
        if self.db.get_run(run_id).await.map_err(db_error)?.is_none() {
            return Err(StoreError::RunNotFound(run_id));
        }
        self.db
            .create_job(run_id, job)
            .await
            .map_err(db_error)?
            .try_into()
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<WorkflowJob>> {
        self.db
            .get_job(job_id)
            .await
            .map_err(db_error)?
            .map(WorkflowJob::try_from)
            .transpose()
    }

    async fn list_jobs(&self, run_id: Uuid) -> StoreResult<Vec<WorkflowJob>> {
        self.db
            .list_jobs(run_id)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(WorkflowJob::try_from)
            .collect()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, to = %job.status))]
    async fn update_job(&self, job: &WorkflowJob, expected: JobStatus) -> StoreResult<bool> {
        if self.db.update_job_if(job, expected).await.map_err(db_error)? {
            return Ok(true);
        }
        if !self.db.job_exists(job.id).await.map_err(db_error)? {
            return Err(StoreError::JobNotFound(job.id));
        }
        Ok(false)
    }

    async fn mark_jobs_queued(&self, run_id: Uuid, job_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        self.db
            .mark_jobs_queued(run_id, job_ids)
            .await
            .map_err(db_error)
    }
}
