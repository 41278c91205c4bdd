//! Worker pool for task execution
//!
//! One pool serves one queue. It claims tasks for the job names it was
//! configured with, runs them through the registered [`TaskHandler`] under a
//! concurrency limit, and reports the outcome back to the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use super::handler::{TaskError, TaskHandler};
use super::poller::{duration_millis, PollerConfig, PollerError, TaskPoller};
use crate::persistence::{ClaimedTask, StoreError, TaskFailureOutcome, TaskQueueStore};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Queue this pool consumes
    pub queue: String,

    /// Job names claimed from the queue
    pub job_names: Vec<String>,

    /// Maximum concurrent task executions
    pub max_concurrency: usize,

    pub poller: PollerConfig,

    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    #[serde(with = "duration_millis")]
    pub stale_reclaim_interval: Duration,

    /// How long a claimed task may go without a heartbeat
    #[serde(with = "duration_millis")]
    pub stale_threshold: Duration,

    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            queue: "default".to_string(),
            job_names: vec![],
            max_concurrency: 10,
            poller: PollerConfig::default(),
            heartbeat_interval: Duration::from_secs(5),
            stale_reclaim_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(queue: impl Into<String>, job_names: Vec<String>) -> Self {
        Self {
            queue: queue.into(),
            job_names,
            ..Default::default()
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_reclaim(mut self, interval: Duration, threshold: Duration) -> Self {
        self.stale_reclaim_interval = interval;
        self.stale_threshold = threshold;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Running and claiming tasks
    Running,
    /// Finishing in-flight tasks, not claiming new ones
    Draining,
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

type HandlerMap = HashMap<String, Arc<dyn TaskHandler>>;

/// Worker pool for one queue
///
/// ```ignore
/// use autopilot_durable::{WorkerPool, WorkerPoolConfig};
///
/// let config = WorkerPoolConfig::new("social", vec!["keyword.research".into()])
///     .with_max_concurrency(4);
/// let pool = WorkerPool::new(store, config);
/// pool.register_handler("keyword.research", handler);
/// pool.start().await?;
/// // ...
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    store: Arc<dyn TaskQueueStore>,
    config: WorkerPoolConfig,
    handlers: RwLock<HandlerMap>,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerPoolStatus>,
    active_tasks: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(store: Arc<dyn TaskQueueStore>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            active_tasks: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            status: RwLock::new(WorkerPoolStatus::Stopped),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Register the handler for a job name. Takes effect on the next start.
    pub fn register_handler(&self, job_name: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().insert(job_name.to_string(), handler);
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id, queue = %self.config.queue))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }
        self.shutdown_tx.send_replace(false);

        info!(
            job_names = ?self.config.job_names,
            max_concurrency = self.config.max_concurrency,
            "starting worker pool"
        );

        let mut loops = self.loops.lock();
        loops.push(self.spawn_poll_loop());
        loops.push(self.spawn_heartbeat_loop());
        loops.push(self.spawn_reclaim_loop());
        Ok(())
    }

    /// Stop claiming and wait for in-flight tasks up to the shutdown timeout.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id, queue = %self.config.queue))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!("initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let available = self.active_tasks.available_permits();
            if available == self.config.max_concurrency {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining_tasks = self.config.max_concurrency - available,
                    "shutdown timeout reached"
                );
                return Err(WorkerPoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let loops: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("worker loop ended abnormally: {}", e);
            }
        }

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!("worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Number of tasks currently executing
    pub fn current_load(&self) -> usize {
        self.config.max_concurrency - self.active_tasks.available_permits()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let handlers: Arc<HandlerMap> = Arc::new(self.handlers.read().clone());
        let active_tasks = Arc::clone(&self.active_tasks);
        let in_flight = Arc::clone(&self.in_flight);
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut poller = TaskPoller::new(
                Arc::clone(&store),
                config.worker_id.clone(),
                config.queue.clone(),
                config.job_names.clone(),
                config.poller.clone(),
                shutdown_rx,
            );

            loop {
                if poller.is_shutdown() {
                    break;
                }

                let available = active_tasks.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll(available).await {
                    Ok(tasks) => {
                        for task in tasks {
                            let Ok(permit) = Arc::clone(&active_tasks).acquire_owned().await
                            else {
                                return;
                            };
                            in_flight.lock().insert(task.id);

                            let store = Arc::clone(&store);
                            let handlers = Arc::clone(&handlers);
                            let in_flight = Arc::clone(&in_flight);
                            let span = tracing::info_span!(
                                "task",
                                task_id = %task.id,
                                job_name = %task.job_name,
                                attempt = task.attempt
                            );
                            tokio::spawn(
                                async move {
                                    let task_id = task.id;
                                    execute(store.as_ref(), &handlers, task).await;
                                    in_flight.lock().remove(&task_id);
                                    drop(permit);
                                }
                                .instrument(span),
                            );
                        }
                    }
                    Err(PollerError::Shutdown) => break,
                    Err(e) => error!("poll error: {}", e),
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("poll loop exited");
        })
    }

    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let interval = self.config.heartbeat_interval;
        let in_flight = Arc::clone(&self.in_flight);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ids: Vec<Uuid> = in_flight.lock().iter().copied().collect();
                        if let Err(e) = store.heartbeat(&ids).await {
                            error!("heartbeat failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("heartbeat loop exited");
        })
    }

    fn spawn_reclaim_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let interval = self.config.stale_reclaim_interval;
        let threshold = self.config.stale_threshold;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.reclaim_stale(threshold).await {
                            Ok(reclaimed) if !reclaimed.is_empty() => {
                                info!(count = reclaimed.len(), "reclaimed stale tasks");
                            }
                            Ok(_) => {}
                            Err(e) => error!("stale task reclamation failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("reclaim loop exited");
        })
    }
}

async fn execute(store: &dyn TaskQueueStore, handlers: &HandlerMap, task: ClaimedTask) {
    let task_id = task.id;
    let result = match handlers.get(&task.job_name) {
        Some(handler) => handler.handle(task).await,
        None => Err(TaskError::permanent(format!(
            "no handler registered for job {}",
            task.job_name
        ))),
    };

    match result {
        Ok(()) => {
            if let Err(e) = store.complete(task_id).await {
                error!(%task_id, "failed to complete task: {}", e);
            }
        }
        Err(err) => match store.fail(task_id, &err.message, err.retryable).await {
            Ok(TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            }) => {
                warn!(
                    error = %err,
                    next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "task failed, will retry"
                );
            }
            Ok(TaskFailureOutcome::Dead) => {
                warn!(error = %err, retryable = err.retryable, "task moved to dead letter");
            }
            Err(e) => error!(%task_id, "failed to record task failure: {}", e),
        },
    }
}
