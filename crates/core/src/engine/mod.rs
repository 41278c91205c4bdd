// Workflow engine
//
// Owns the run/job state machine on top of the pluggable store, queue and
// collaborator traits:
// - dispatcher: resolves ready jobs and enqueues them
// - lifecycle: wraps every handler delivery with persisted bookkeeping
// - progress: recomputes run progress and terminal status from job rows
// - fanout: appends per-account publish jobs at run time
// - control: operator-facing run control API
// - automation: template resolution and run materialization
//
// Decision: The store is the single source of truth; every status write is a compare-and-set
// Decision: All collaborators are injected, the engine holds no global state

use std::sync::Arc;

use uuid::Uuid;

use crate::collaborators::{
    LogNotifier, Notifier, SchedulingAdvisor, SocialDirectory, WorkflowNotification,
};
use crate::error::{EngineError, QueueError, Result};
use crate::job::{JobEnvelope, WorkflowJob};
use crate::payload::PayloadRenderer;
use crate::queues::{SOCIAL_PUBLISH_JOB, SOCIAL_QUEUE};
use crate::run::WorkflowRun;
use crate::template::{TemplateProvider, TemplateRegistry, WorkflowTemplate};
use crate::traits::{EnqueueOptions, JobQueue, WorkflowStore};

mod automation;
mod control;
mod dispatcher;
mod fanout;
mod lifecycle;
mod progress;


pub use automation::StartAutomation;
pub use control::Caller;
pub use dispatcher::{DispatchReason, DispatchReport};
pub use fanout::FanOutSummary;
pub use lifecycle::{Delivery, DeliveryOutcome};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Queue that publish fan-out jobs are placed on.
    pub social_queue: String,
    /// Job name of per-account publish jobs.
    pub publish_job_name: String,
    /// Attempts for run-level read-modify-write updates before giving up.
    pub max_cas_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            social_queue: SOCIAL_QUEUE.to_string(),
            publish_job_name: SOCIAL_PUBLISH_JOB.to_string(),
            max_cas_attempts: 5,
        }
    }
}

impl EngineConfig {
    /// Load from environment (`SOCIAL_QUEUE`, `PUBLISH_JOB_NAME`).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            social_queue: std::env::var("SOCIAL_QUEUE").unwrap_or(defaults.social_queue),
            publish_job_name: std::env::var("PUBLISH_JOB_NAME")
                .unwrap_or(defaults.publish_job_name),
            max_cas_attempts: defaults.max_cas_attempts,
        }
    }
}

/// Collaborators needed by the publish fan-out scheduler.
#[derive(Clone)]
pub struct FanOutDeps {
    pub directory: Arc<dyn SocialDirectory>,
    pub advisor: Arc<dyn SchedulingAdvisor>,
}

/// The campaign automation workflow engine.
///
/// Cheap to share behind an `Arc`; every method loads fresh state from the store.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    queue: Arc<dyn JobQueue>,
    templates: Arc<dyn TemplateProvider>,
    notifier: Arc<dyn Notifier>,
    fan_out: Option<FanOutDeps>,
    renderer: PayloadRenderer,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        queue: Arc<dyn JobQueue>,
        templates: Arc<dyn TemplateProvider>,
    ) -> Self {
        Self {
            store,
            queue,
            templates,
            notifier: Arc::new(LogNotifier),
            fan_out: None,
            renderer: PayloadRenderer::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_fan_out(
        mut self,
        directory: Arc<dyn SocialDirectory>,
        advisor: Arc<dyn SchedulingAdvisor>,
    ) -> Self {
        self.fan_out = Some(FanOutDeps { directory, advisor });
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn templates(&self) -> &Arc<dyn TemplateProvider> {
        &self.templates
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn load_run(&self, run_id: Uuid) -> Result<WorkflowRun> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::run_not_found(run_id))
    }

    async fn load_job(&self, job_id: Uuid) -> Result<WorkflowJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::job_not_found(job_id))
    }

    /// Wrap a job in its queue envelope and enqueue it.
    async fn enqueue_job(
        &self,
        job: &WorkflowJob,
        options: EnqueueOptions,
    ) -> std::result::Result<String, QueueError> {
        let payload = serde_json::to_value(JobEnvelope::for_job(job))
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.queue
            .add_job(&job.queue_name, &job.job_name, payload, options)
            .await
    }

    /// Send a notification; delivery failures are logged and never propagate.
    async fn notify(&self, notification: WorkflowNotification) {
        let run_id = notification.run_id;
        if let Err(e) = self.notifier.notify(notification).await {
            tracing::warn!(%run_id, error = %e, "failed to deliver workflow notification");
        }
    }
}

/// Upsert template definitions into the store and build a provider over the
/// stored rows (with their store-assigned ids and versions).
pub async fn sync_templates(
    store: &dyn WorkflowStore,
    definitions: Vec<WorkflowTemplate>,
) -> Result<TemplateRegistry> {
    for definition in &definitions {
        definition.validate()?;
    }
    let count = definitions.len();
    let stored = store.upsert_templates(definitions).await?;
    tracing::info!(count, "workflow templates synced");
    Ok(TemplateRegistry::new(stored)?)
}

/// Re-read the store and swap the provider's set in place.
pub async fn reload_templates(
    store: &dyn WorkflowStore,
    registry: &TemplateRegistry,
) -> Result<u64> {
    let stored = store.list_templates().await?;
    Ok(registry.reload(stored)?)
}
