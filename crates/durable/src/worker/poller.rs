//! Task polling with exponential backoff
//!
//! An idle queue is polled less and less often; the interval resets to the
//! minimum as soon as a poll returns work.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::persistence::{ClaimedTask, StoreError, TaskQueueStore};

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Poll interval while tasks keep arriving
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Poll interval ceiling while idle
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub backoff_multiplier: f64,

    /// Maximum tasks to claim per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Claims tasks of one queue with adaptive backoff
pub struct TaskPoller {
    store: Arc<dyn TaskQueueStore>,
    worker_id: String,
    queue: String,
    job_names: Vec<String>,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskPoller {
    pub fn new(
        store: Arc<dyn TaskQueueStore>,
        worker_id: String,
        queue: String,
        job_names: Vec<String>,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let current_interval = config.min_interval;
        Self {
            store,
            worker_id,
            queue,
            job_names,
            config,
            current_interval,
            shutdown_rx,
        }
    }

    /// Claim up to `max_tasks` (capped by the batch size).
    #[instrument(skip(self), fields(worker_id = %self.worker_id, queue = %self.queue))]
    pub async fn poll(&mut self, max_tasks: usize) -> Result<Vec<ClaimedTask>, PollerError> {
        if self.is_shutdown() {
            return Err(PollerError::Shutdown);
        }

        let batch_size = max_tasks.min(self.config.batch_size);
        let tasks = self
            .store
            .claim(&self.worker_id, &self.queue, &self.job_names, batch_size)
            .await?;

        if tasks.is_empty() {
            self.increase_backoff();
            trace!(
                interval_ms = self.current_interval.as_millis() as u64,
                "no tasks, backing off"
            );
        } else {
            self.reset_backoff();
            debug!(count = tasks.len(), "claimed tasks");
        }

        Ok(tasks)
    }

    /// Sleep for the current interval. Returns `true` if shutdown was
    /// signaled while waiting.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("shutdown signal received during wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = next.min(self.config.max_interval);
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker is shutting down")]
    Shutdown,
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryTaskQueue, TaskDefinition};
    use serde_json::json;

    fn poller(store: Arc<InMemoryTaskQueue>) -> (TaskPoller, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let poller = TaskPoller::new(
            store,
            "w".to_string(),
            "q".to_string(),
            vec!["job".to_string()],
            PollerConfig::new()
                .with_min_interval(Duration::from_millis(100))
                .with_max_interval(Duration::from_millis(300))
                .with_backoff_multiplier(2.0)
                .with_batch_size(2),
            rx,
        );
        (poller, tx)
    }

    #[tokio::test]
    async fn test_backoff_grows_when_idle_and_resets_on_work() {
        let store = Arc::new(InMemoryTaskQueue::new());
        let (mut poller, _tx) = poller(store.clone());

        assert!(poller.poll(10).await.unwrap().is_empty());
        assert_eq!(poller.current_interval(), Duration::from_millis(200));
        assert!(poller.poll(10).await.unwrap().is_empty());
        assert_eq!(poller.current_interval(), Duration::from_millis(300));

        store
            .enqueue(TaskDefinition::new("q", "job", json!({})))
            .await
            .unwrap();
        assert_eq!(poller.poll(10).await.unwrap().len(), 1);
        assert_eq!(poller.current_interval(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_batch_size_caps_claim() {
        let store = Arc::new(InMemoryTaskQueue::new());
        for _ in 0..5 {
            store
                .enqueue(TaskDefinition::new("q", "job", json!({})))
                .await
                .unwrap();
        }
        let (mut poller, _tx) = poller(store);
        assert_eq!(poller.poll(10).await.unwrap().len(), 2);
        assert_eq!(poller.poll(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling() {
        let store = Arc::new(InMemoryTaskQueue::new());
        let (mut poller, tx) = poller(store);
        tx.send(true).unwrap();

        assert!(matches!(poller.poll(1).await, Err(PollerError::Shutdown)));
        assert!(poller.is_shutdown());
    }
}
