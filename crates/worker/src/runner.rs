// Workflow worker runtime
// Decision: One WorkerPool per queue so per-queue concurrency limits hold
// Decision: Queue tasks carry a JobEnvelope; the engine owns the job lifecycle
//
// Wiring:
//   StorageBackend -> WorkflowStore + TaskQueueStore + SocialDirectory
//   TaskQueueStore -> DurableJobQueue (engine side) and WorkerPools (consumer side)
//   WorkerPool -> EnvelopeHandler -> HandlerRegistry -> WorkflowEngine::execute_delivery

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, info_span, warn, Instrument};

use autopilot_core::telemetry::job_span_name;
use autopilot_core::{
    builtin_templates, sync_templates, Delivery, EngineConfig, HandlerRegistry, JobEnvelope,
    SocialDirectory, TemplateRegistry, WorkflowEngine, WorkflowStore,
};
use autopilot_durable::{
    ClaimedTask, DurableJobQueue, RetryPolicy, TaskError, TaskHandler, TaskQueueStore, WorkerPool,
    WorkerPoolConfig, WorkerPoolError,
};
use autopilot_storage::StorageBackend;

use crate::clients::Collaborators;
use crate::config::WorkerConfig;
use crate::handlers::{self, HandlerDeps};

// =============================================================================
// Runtime assembly
// =============================================================================

/// Engine, templates and handlers wired over one storage backend.
pub struct WorkerRuntime {
    pub engine: Arc<WorkflowEngine>,
    pub templates: Arc<TemplateRegistry>,
    pub handlers: HandlerRegistry,
    pub tasks: Arc<dyn TaskQueueStore>,
}

impl WorkerRuntime {
    /// Build against a storage backend with HTTP collaborators.
    pub async fn from_backend(backend: &StorageBackend, config: &WorkerConfig) -> Result<Self> {
        Self::build(
            backend.workflow_store(),
            backend.task_queue(),
            backend.social_directory(),
            Collaborators::http(&config.collaborators),
            config.retry_policy.clone(),
        )
        .await
    }

    /// Sync the built-in templates into the store and assemble the engine.
    pub async fn build(
        store: Arc<dyn WorkflowStore>,
        tasks: Arc<dyn TaskQueueStore>,
        directory: Arc<dyn SocialDirectory>,
        collaborators: Collaborators,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let definitions = builtin_templates().context("Failed to load built-in templates")?;
        let templates = Arc::new(
            sync_templates(store.as_ref(), definitions)
                .await
                .context("Failed to sync workflow templates")?,
        );

        let queue = Arc::new(DurableJobQueue::new(tasks.clone()).with_retry_policy(retry_policy));
        let engine = WorkflowEngine::new(store, queue, templates.clone())
            .with_notifier(collaborators.notifier.clone())
            .with_fan_out(directory.clone(), collaborators.advisor.clone())
            .with_config(EngineConfig::from_env());

        let handlers = handlers::registry(&HandlerDeps {
            generation: collaborators.generation,
            publisher: collaborators.publisher,
            analytics: collaborators.analytics,
            directory,
        });

        Ok(Self {
            engine: Arc::new(engine),
            templates,
            handlers,
            tasks,
        })
    }

    /// Worker pools for every queue that has handlers.
    pub fn worker(&self, config: &WorkerConfig) -> WorkflowWorker {
        WorkflowWorker::new(
            self.engine.clone(),
            self.handlers.clone(),
            self.tasks.clone(),
            config,
        )
    }
}

// =============================================================================
// Task -> engine bridge
// =============================================================================

/// Runs a claimed task through the engine with the handler registered for it.
struct EnvelopeHandler {
    engine: Arc<WorkflowEngine>,
    registry: Arc<HandlerRegistry>,
}

#[async_trait]
impl TaskHandler for EnvelopeHandler {
    async fn handle(&self, task: ClaimedTask) -> Result<(), TaskError> {
        let envelope: JobEnvelope = serde_json::from_value(task.payload)
            .map_err(|e| TaskError::permanent(format!("malformed job envelope: {}", e)))?;

        let handler = self
            .registry
            .get(&task.queue, &task.job_name)
            .ok_or_else(|| {
                TaskError::permanent(format!(
                    "no handler for {} on queue {}",
                    task.job_name, task.queue
                ))
            })?;

        let span = info_span!(
            "job",
            otel.name = %job_span_name(&task.job_name),
            queue = %task.queue,
            job_name = %task.job_name,
            attempt = task.attempt,
        );

        let outcome = self
            .engine
            .execute_delivery(
                handler.as_ref(),
                envelope,
                Delivery {
                    attempt: task.attempt,
                    max_attempts: task.max_attempts,
                },
            )
            .instrument(span)
            .await
            .map_err(TaskError::from)?;

        debug!(task_id = %task.id, ?outcome, "delivery handled");
        Ok(())
    }
}

// =============================================================================
// WorkflowWorker
// =============================================================================

/// Per-queue worker pools feeding the workflow engine
pub struct WorkflowWorker {
    pools: Vec<WorkerPool>,
}

impl WorkflowWorker {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        registry: HandlerRegistry,
        tasks: Arc<dyn TaskQueueStore>,
        config: &WorkerConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        let bridge: Arc<dyn TaskHandler> = Arc::new(EnvelopeHandler {
            engine,
            registry: registry.clone(),
        });

        let pools = registry
            .queues()
            .into_iter()
            .map(|queue| {
                let job_names = registry.job_names(&queue);
                let pool_config = WorkerPoolConfig::new(queue.clone(), job_names.clone())
                    .with_worker_id(format!("{}-{}", config.worker_id, queue))
                    .with_max_concurrency(config.concurrency_for(&queue))
                    .with_poller(config.poller.clone());

                let pool = WorkerPool::new(tasks.clone(), pool_config);
                for job_name in &job_names {
                    pool.register_handler(job_name, bridge.clone());
                }
                pool
            })
            .collect();

        Self { pools }
    }

    pub fn pools(&self) -> &[WorkerPool] {
        &self.pools
    }

    /// Start every pool. Pools already started are stopped again on failure.
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        for (index, pool) in self.pools.iter().enumerate() {
            if let Err(e) = pool.start().await {
                for started in &self.pools[..index] {
                    if let Err(stop_err) = started.shutdown().await {
                        warn!(queue = %started.queue(), error = %stop_err, "failed to stop pool");
                    }
                }
                return Err(e);
            }
        }

        info!(
            queues = ?self.pools.iter().map(|p| p.queue()).collect::<Vec<_>>(),
            "workflow worker started"
        );
        Ok(())
    }

    /// Drain every pool concurrently. All pools are asked to stop even if one fails.
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        let results = join_all(self.pools.iter().map(|pool| pool.shutdown())).await;

        let mut first_error = None;
        for (pool, result) in self.pools.iter().zip(results) {
            if let Err(e) = result {
                warn!(queue = %pool.queue(), error = %e, "pool did not shut down cleanly");
                first_error.get_or_insert(e);
            }
        }
        info!("workflow worker stopped");
        first_error.map_or(Ok(()), Err)
    }
}
