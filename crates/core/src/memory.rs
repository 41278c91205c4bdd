// In-memory implementations for dev mode and testing
//
// These implementations keep all data in process memory:
// - Dev mode without a database (control plane with an embedded worker)
// - Unit and scenario tests of the engine

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::collaborators::{
    CollaboratorError, CollaboratorResult, NewSocialPost, SocialAccount, SocialDirectory,
    SocialPost, SocialPostStatus,
};
use crate::error::{QueueError, StoreError};
use crate::job::{JobStatus, NewJob, WorkflowJob};
use crate::run::{JobCounts, NewRun, RunFilter, RunStatus, RunSummary, WorkflowRun};
use crate::template::WorkflowTemplate;
use crate::traits::{EnqueueOptions, JobQueue, StoreResult, WorkflowStore};

// ============================================================================
// InMemoryWorkflowStore
// ============================================================================

#[derive(Default)]
struct StoreState {
    templates: HashMap<String, WorkflowTemplate>,
    runs: HashMap<Uuid, WorkflowRun>,
    jobs: HashMap<Uuid, WorkflowJob>,
    /// Job ids per run in creation order.
    run_jobs: HashMap<Uuid, Vec<Uuid>>,
}

impl StoreState {
    fn jobs_of(&self, run_id: Uuid) -> Vec<WorkflowJob> {
        self.run_jobs
            .get(&run_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.jobs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert_job(&mut self, run_id: Uuid, job: NewJob, now: DateTime<Utc>) -> WorkflowJob {
        let row = WorkflowJob {
            id: Uuid::now_v7(),
            run_id,
            step_id: job.step_id,
            queue_name: job.queue_name,
            job_name: job.job_name,
            status: job.status,
            payload: job.payload,
            result: None,
            error_message: None,
            attempts: 0,
            scheduled_for: job.scheduled_for,
            started_at: None,
            completed_at: None,
            failed_at: None,
            metadata: job.metadata,
            created_at: now,
            updated_at: now,
        };
        self.run_jobs.entry(run_id).or_default().push(row.id);
        self.jobs.insert(row.id, row.clone());
        row
    }
}

/// Workflow store backed by a single lock, so every operation is atomic.
#[derive(Default, Clone)]
pub struct InMemoryWorkflowStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a job row without a status check (test setup only).
    pub fn put_job(&self, job: WorkflowJob) {
        self.state.write().jobs.insert(job.id, job);
    }

    /// Overwrite a run row without a status check (test setup only).
    pub fn put_run(&self, run: WorkflowRun) {
        self.state.write().runs.insert(run.id, run);
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn upsert_templates(
        &self,
        templates: Vec<WorkflowTemplate>,
    ) -> StoreResult<Vec<WorkflowTemplate>> {
        let mut state = self.state.write();
        let mut stored = Vec::with_capacity(templates.len());
        for mut template in templates {
            match state.templates.get(&template.slug) {
                Some(existing) => {
                    template.id = existing.id;
                    template.version = if existing.same_definition(&template) {
                        existing.version
                    } else {
                        existing.version + 1
                    };
                }
                None => {
                    template.id = Uuid::now_v7();
                    template.version = template.version.max(1);
                }
            }
            state
                .templates
                .insert(template.slug.clone(), template.clone());
            stored.push(template);
        }
        Ok(stored)
    }

    async fn list_templates(&self) -> StoreResult<Vec<WorkflowTemplate>> {
        let mut templates: Vec<_> = self.state.read().templates.values().cloned().collect();
        templates.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(templates)
    }

    async fn create_run(
        &self,
        run: NewRun,
        jobs: Vec<NewJob>,
    ) -> StoreResult<(WorkflowRun, Vec<WorkflowJob>)> {
        let now = Utc::now();
        let row = WorkflowRun {
            id: Uuid::now_v7(),
            campaign_id: run.campaign_id,
            user_id: run.user_id,
            template_id: run.template_id,
            template_slug: run.template_slug,
            status: RunStatus::Pending,
            progress: 0.0,
            started_at: None,
            paused_at: None,
            completed_at: None,
            metadata: run.metadata,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write();
        state.runs.insert(row.id, row.clone());
        state.run_jobs.insert(row.id, Vec::with_capacity(jobs.len()));
        let created = jobs
            .into_iter()
            .map(|job| state.insert_job(row.id, job, now))
            .collect();
        Ok((row, created))
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<WorkflowRun>> {
        Ok(self.state.read().runs.get(&run_id).cloned())
    }

    async fn find_existing_run_for_campaign(
        &self,
        campaign_id: Uuid,
    ) -> StoreResult<Option<WorkflowRun>> {
        let state = self.state.read();
        Ok(state
            .runs
            .values()
            .filter(|r| r.campaign_id == campaign_id && r.status != RunStatus::Cancelled)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn list_runs(&self, filter: RunFilter) -> StoreResult<Vec<RunSummary>> {
        let state = self.state.read();
        let mut runs: Vec<&WorkflowRun> = state
            .runs
            .values()
            .filter(|r| filter.user_id.map_or(true, |u| r.user_id == u))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(runs
            .into_iter()
            .map(|run| RunSummary {
                run: run.clone(),
                job_counts: JobCounts::from_jobs(&state.jobs_of(run.id)),
            })
            .collect())
    }

    async fn update_run(
        &self,
        run: &WorkflowRun,
        expected: RunStatus,
    ) -> StoreResult<Option<WorkflowRun>> {
        let mut state = self.state.write();
        let stored = state
            .runs
            .get_mut(&run.id)
            .ok_or(StoreError::RunNotFound(run.id))?;
        if stored.status != expected || stored.updated_at != run.updated_at {
            return Ok(None);
        }
        *stored = run.clone();
        stored.updated_at = next_timestamp(run.updated_at);
        Ok(Some(stored.clone()))
    }

    async fn create_job(&self, run_id: Uuid, job: NewJob) -> StoreResult<WorkflowJob> {
        let mut state = self.state.write();
        if !state.runs.contains_key(&run_id) {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(state.insert_job(run_id, job, Utc::now()))
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<WorkflowJob>> {
        Ok(self.state.read().jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, run_id: Uuid) -> StoreResult<Vec<WorkflowJob>> {
        Ok(self.state.read().jobs_of(run_id))
    }

    async fn update_job(&self, job: &WorkflowJob, expected: JobStatus) -> StoreResult<bool> {
        let mut state = self.state.write();
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or(StoreError::JobNotFound(job.id))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = job.clone();
        stored.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_jobs_queued(&self, run_id: Uuid, job_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        let mut state = self.state.write();
        let now = Utc::now();
        let mut moved = Vec::new();
        for id in job_ids {
            if let Some(job) = state.jobs.get_mut(id) {
                if job.run_id == run_id && job.status == JobStatus::Pending {
                    job.status = JobStatus::Queued;
                    job.updated_at = now;
                    moved.push(*id);
                }
            }
        }
        Ok(moved)
    }
}

/// A timestamp strictly after `previous`, so every write changes `updated_at`.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

// ============================================================================
// RecordingQueue - JobQueue that records enqueues instead of delivering
// ============================================================================

/// A job accepted by [`RecordingQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueuedJob {
    pub id: String,
    pub queue: String,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub delay: Option<Duration>,
}

/// Job queue for tests: records every enqueue and can be switched to fail.
#[derive(Debug, Default, Clone)]
pub struct RecordingQueue {
    jobs: Arc<Mutex<Vec<EnqueuedJob>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent enqueues fail with `QueueError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<EnqueuedJob> {
        self.jobs.lock().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<EnqueuedJob> {
        std::mem::take(&mut *self.jobs.lock())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn add_job(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(format!(
                "queue {} is not accepting jobs",
                queue
            )));
        }
        let id = Uuid::now_v7().to_string();
        self.jobs.lock().push(EnqueuedJob {
            id: id.clone(),
            queue: queue.to_string(),
            job_name: job_name.to_string(),
            payload,
            delay: options.delay,
        });
        Ok(id)
    }
}

// ============================================================================
// InMemorySocialDirectory
// ============================================================================

#[derive(Default)]
struct SocialState {
    posts: HashMap<Uuid, SocialPost>,
    accounts: Vec<SocialAccount>,
}

/// Social posts and accounts kept in memory.
#[derive(Default, Clone)]
pub struct InMemorySocialDirectory {
    state: Arc<RwLock<SocialState>>,
}

impl InMemorySocialDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an account and return it.
    pub fn add_account(&self, user_id: Uuid, platform: &str, account_id: &str) -> SocialAccount {
        let account = SocialAccount {
            id: Uuid::now_v7(),
            user_id,
            platform: platform.to_string(),
            account_id: account_id.to_string(),
            account_name: account_id.to_string(),
            access_token: format!("token-{}", account_id),
            is_active: true,
        };
        self.state.write().accounts.push(account.clone());
        account
    }

    pub fn post(&self, post_id: Uuid) -> Option<SocialPost> {
        self.state.read().posts.get(&post_id).cloned()
    }
}

#[async_trait]
impl SocialDirectory for InMemorySocialDirectory {
    async fn get_post(&self, post_id: Uuid) -> CollaboratorResult<Option<SocialPost>> {
        Ok(self.post(post_id))
    }

    async fn create_draft_post(&self, post: NewSocialPost) -> CollaboratorResult<SocialPost> {
        let row = SocialPost {
            id: Uuid::now_v7(),
            user_id: post.user_id,
            campaign_id: post.campaign_id,
            platform: post.platform,
            content: post.content,
            media: post.media,
            status: SocialPostStatus::Draft,
            scheduled_for: None,
            platform_post_id: None,
            created_at: Utc::now(),
        };
        self.state.write().posts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_active_accounts(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> CollaboratorResult<Vec<SocialAccount>> {
        Ok(self
            .state
            .read()
            .accounts
            .iter()
            .filter(|a| a.user_id == user_id && a.platform == platform && a.is_active)
            .cloned()
            .collect())
    }

    async fn get_account(
        &self,
        user_id: Uuid,
        platform: &str,
        account_id: &str,
    ) -> CollaboratorResult<Option<SocialAccount>> {
        Ok(self
            .state
            .read()
            .accounts
            .iter()
            .find(|a| a.user_id == user_id && a.platform == platform && a.account_id == account_id)
            .cloned())
    }

    async fn mark_post_scheduled(
        &self,
        post_id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> CollaboratorResult<()> {
        let mut state = self.state.write();
        let post = state
            .posts
            .get_mut(&post_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("social post {}", post_id)))?;
        post.status = SocialPostStatus::Scheduled;
        post.scheduled_for = Some(scheduled_for);
        Ok(())
    }

    async fn mark_post_published(
        &self,
        post_id: Uuid,
        platform_post_id: &str,
    ) -> CollaboratorResult<()> {
        let mut state = self.state.write();
        let post = state
            .posts
            .get_mut(&post_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("social post {}", post_id)))?;
        post.status = SocialPostStatus::Published;
        post.platform_post_id = Some(platform_post_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobMetadata;
    use serde_json::json;

    fn new_job(step: &str) -> NewJob {
        NewJob {
            step_id: step.to_string(),
            queue_name: "q".into(),
            job_name: "j".into(),
            status: JobStatus::Pending,
            payload: json!({}),
            scheduled_for: None,
            metadata: JobMetadata::default(),
        }
    }

    fn new_run(campaign_id: Uuid) -> NewRun {
        NewRun {
            campaign_id,
            user_id: Uuid::now_v7(),
            template_id: Uuid::now_v7(),
            template_slug: "t".into(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_update_run_is_compare_and_set() {
        let store = InMemoryWorkflowStore::new();
        let (mut run, _) = store
            .create_run(new_run(Uuid::now_v7()), vec![])
            .await
            .unwrap();

        let stale = run.clone();
        run.status = RunStatus::Active;
        let stored = store
            .update_run(&run, RunStatus::Pending)
            .await
            .unwrap()
            .expect("first write wins");
        assert!(stored.updated_at > run.updated_at);

        // The stale copy still carries the old updated_at and loses.
        let mut late = stale;
        late.set_metadata("keywords", json!(["late"]));
        assert!(store
            .update_run(&late, RunStatus::Pending)
            .await
            .unwrap()
            .is_none());

        // Writing back the returned row succeeds.
        let mut paused = stored;
        paused.status = RunStatus::Paused;
        assert!(store
            .update_run(&paused, RunStatus::Active)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            store.get_run(run.id).await.unwrap().unwrap().status,
            RunStatus::Paused
        );
    }

    #[tokio::test]
    async fn test_mark_jobs_queued_only_moves_pending_once() {
        let store = InMemoryWorkflowStore::new();
        let (run, jobs) = store
            .create_run(new_run(Uuid::now_v7()), vec![new_job("a"), new_job("b")])
            .await
            .unwrap();
        let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();

        let first = store.mark_jobs_queued(run.id, &ids).await.unwrap();
        let second = store.mark_jobs_queued(run.id, &ids).await.unwrap();
        assert_eq!(first, ids);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_list_jobs_in_creation_order() {
        let store = InMemoryWorkflowStore::new();
        let (run, _) = store
            .create_run(new_run(Uuid::now_v7()), vec![new_job("a"), new_job("b")])
            .await
            .unwrap();
        store.create_job(run.id, new_job("c")).await.unwrap();

        let steps: Vec<String> = store
            .list_jobs(run.id)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.step_id)
            .collect();
        assert_eq!(steps, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_find_existing_run_ignores_cancelled() {
        let store = InMemoryWorkflowStore::new();
        let campaign = Uuid::now_v7();
        let (mut run, _) = store.create_run(new_run(campaign), vec![]).await.unwrap();
        assert!(store
            .find_existing_run_for_campaign(campaign)
            .await
            .unwrap()
            .is_some());

        run.status = RunStatus::Cancelled;
        store.update_run(&run, RunStatus::Pending).await.unwrap();
        assert!(store
            .find_existing_run_for_campaign(campaign)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_upsert_templates_bumps_version_on_change() {
        let store = InMemoryWorkflowStore::new();
        let mut templates = crate::template::builtin_templates().unwrap();
        templates.truncate(1);

        let first = store.upsert_templates(templates.clone()).await.unwrap();
        let again = store.upsert_templates(templates.clone()).await.unwrap();
        assert_eq!(first[0].id, again[0].id);
        assert_eq!(again[0].version, first[0].version);

        templates[0].name = "Renamed".into();
        let changed = store.upsert_templates(templates).await.unwrap();
        assert_eq!(changed[0].id, first[0].id);
        assert_eq!(changed[0].version, first[0].version + 1);
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_counts() {
        let store = InMemoryWorkflowStore::new();
        let a = new_run(Uuid::now_v7());
        let owner = a.user_id;
        store.create_run(a, vec![new_job("x")]).await.unwrap();
        store
            .create_run(new_run(Uuid::now_v7()), vec![])
            .await
            .unwrap();

        let all = store.list_runs(RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let mine = store
            .list_runs(RunFilter {
                user_id: Some(owner),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].job_counts.pending, 1);
    }

    #[tokio::test]
    async fn test_recording_queue_failure_switch() {
        let queue = RecordingQueue::new();
        queue
            .add_job("q", "j", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        queue.set_failing(true);
        assert!(queue
            .add_job("q", "j", json!({}), EnqueueOptions::default())
            .await
            .is_err());
        assert_eq!(queue.len(), 1);
    }
}
