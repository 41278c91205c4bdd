// Worker configuration
// Decision: Everything comes from environment variables with working local defaults

use std::collections::HashMap;
use std::time::Duration;

use autopilot_core::queues::default_concurrency;
use autopilot_durable::{PollerConfig, RetryPolicy};
use tracing::warn;
use uuid::Uuid;

/// Base URLs and credentials of the services handlers call.
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    pub generation_url: String,
    pub social_url: String,
    pub scheduling_url: String,
    pub analytics_url: String,
    /// Bearer token sent to every collaborator.
    pub api_token: Option<String>,
    /// Notifications are only logged when unset.
    pub notify_webhook_url: Option<String>,
    pub request_timeout: Duration,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            generation_url: "http://localhost:8101".to_string(),
            social_url: "http://localhost:8102".to_string(),
            scheduling_url: "http://localhost:8103".to_string(),
            analytics_url: "http://localhost:8104".to_string(),
            api_token: None,
            notify_webhook_url: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl CollaboratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            generation_url: env_or("GENERATION_API_URL", defaults.generation_url),
            social_url: env_or("SOCIAL_API_URL", defaults.social_url),
            scheduling_url: env_or("SCHEDULING_API_URL", defaults.scheduling_url),
            analytics_url: env_or("ANALYTICS_API_URL", defaults.analytics_url),
            api_token: non_empty_env("COLLABORATOR_API_TOKEN"),
            notify_webhook_url: non_empty_env("NOTIFY_WEBHOOK_URL"),
            request_timeout: std::env::var("COLLABORATOR_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

/// Configuration for the workflow worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID (unique identifier for this worker instance)
    pub worker_id: String,
    /// Per-queue concurrency overrides
    pub queue_concurrency: HashMap<String, usize>,
    /// Retry policy applied to every job the engine enqueues
    pub retry_policy: RetryPolicy,
    /// Polling cadence shared by every queue pool
    pub poller: PollerConfig,
    pub collaborators: CollaboratorConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            queue_concurrency: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            poller: PollerConfig::default(),
            collaborators: CollaboratorConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// - `WORKER_ID`: worker identifier (default: `worker-<uuid>`)
    /// - `QUEUE_CONCURRENCY`: overrides such as `social=8,content-generation=2`
    /// - `QUEUE_MAX_ATTEMPTS`: attempts before a job is dead-lettered
    /// - collaborator endpoints, see [`CollaboratorConfig::from_env`]
    pub fn from_env() -> Self {
        let worker_id =
            std::env::var("WORKER_ID").unwrap_or_else(|_| format!("worker-{}", Uuid::now_v7()));

        let queue_concurrency = std::env::var("QUEUE_CONCURRENCY")
            .map(|raw| parse_queue_concurrency(&raw))
            .unwrap_or_default();

        Self {
            worker_id,
            queue_concurrency,
            retry_policy: RetryPolicy::from_env(),
            poller: PollerConfig::default(),
            collaborators: CollaboratorConfig::from_env(),
        }
    }

    /// Concurrency for a queue: the override when set, the queue default otherwise.
    pub fn concurrency_for(&self, queue: &str) -> usize {
        self.queue_concurrency
            .get(queue)
            .copied()
            .unwrap_or_else(|| default_concurrency(queue))
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_concurrency(mut self, queue: impl Into<String>, concurrency: usize) -> Self {
        self.queue_concurrency.insert(queue.into(), concurrency.max(1));
        self
    }
}

/// Parse `queue=n` pairs separated by commas. Malformed entries are skipped.
pub fn parse_queue_concurrency(raw: &str) -> HashMap<String, usize> {
    let mut overrides = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry
            .split_once('=')
            .map(|(queue, n)| (queue.trim(), n.trim().parse::<usize>()));
        match parsed {
            Some((queue, Ok(n))) if !queue.is_empty() && n > 0 => {
                overrides.insert(queue.to_string(), n);
            }
            _ => warn!(entry, "ignoring malformed QUEUE_CONCURRENCY entry"),
        }
    }
    overrides
}

fn env_or(key: &str, default: String) -> String {
    non_empty_env(key).unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
