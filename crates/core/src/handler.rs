// Job handler abstraction
//
// Every step job is executed by a JobHandler looked up by (queue, job name) in
// a HandlerRegistry. Handlers only compute; persistence, progress, dispatch and
// notifications are applied by the engine around them.
// Decision: Handlers return run metadata as a merge patch instead of writing the run
// Decision: Error kinds, not message text, drive retry decisions

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::CollaboratorError;

/// Everything a handler knows about the job it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub step_id: String,
    pub user_id: Uuid,
    pub campaign_id: Uuid,
    /// 1-based delivery attempt.
    pub attempt: u32,
    /// Run metadata snapshot taken when the job started.
    pub run_metadata: serde_json::Value,
}

impl JobContext {
    pub fn metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.run_metadata.get(key)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata(key).and_then(|v| v.as_str())
    }
}

/// A post to schedule across a user's accounts on one platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishTarget {
    pub platform: String,
    pub post_id: Uuid,
}

/// Successful handler output.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    /// Stored on the job row.
    pub result: serde_json::Value,
    /// Top-level keys merged into the run metadata.
    pub run_metadata: serde_json::Map<String, serde_json::Value>,
    /// Posts handed to the publish fan-out scheduler.
    pub publish_targets: Vec<PublishTarget>,
}

impl JobOutput {
    pub fn new(result: serde_json::Value) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.run_metadata.insert(key.into(), value);
        self
    }

    pub fn with_publish_targets(mut self, targets: Vec<PublishTarget>) -> Self {
        self.publish_targets = targets;
        self
    }
}

/// Failure classification used for retry decisions and notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorKind {
    /// Bad payload or missing prerequisite data. Retrying will not help.
    Validation,
    /// Upstream throttled the request.
    RateLimited,
    /// Credentials rejected. Needs user action.
    Unauthorized,
    /// Upstream service failure.
    External,
    /// Bug or infrastructure failure on our side.
    Internal,
}

impl HandlerErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandlerErrorKind::RateLimited | HandlerErrorKind::External | HandlerErrorKind::Internal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerErrorKind::Validation => "validation",
            HandlerErrorKind::RateLimited => "rate_limited",
            HandlerErrorKind::Unauthorized => "unauthorized",
            HandlerErrorKind::External => "external",
            HandlerErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for HandlerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler failure with a kind and an optional source chain.
#[derive(Debug)]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn new(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Internal, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::External, message)
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Messages of this error and its sources, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.message.clone()];
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<CollaboratorError> for HandlerError {
    fn from(err: CollaboratorError) -> Self {
        let kind = match &err {
            CollaboratorError::RateLimited { .. } => HandlerErrorKind::RateLimited,
            CollaboratorError::Unauthorized(_) => HandlerErrorKind::Unauthorized,
            CollaboratorError::NotFound(_) | CollaboratorError::Invalid(_) => {
                HandlerErrorKind::Validation
            }
            CollaboratorError::Upstream(_) => HandlerErrorKind::External,
        };
        HandlerError::new(kind, err.to_string()).with_source(err)
    }
}

impl From<crate::error::StoreError> for HandlerError {
    fn from(err: crate::error::StoreError) -> Self {
        HandlerError::internal(err.to_string()).with_source(err)
    }
}

impl From<crate::error::EngineError> for HandlerError {
    fn from(err: crate::error::EngineError) -> Self {
        HandlerError::internal(err.to_string()).with_source(err)
    }
}

// ============================================================================
// JobHandler - Uniform execute contract
// ============================================================================

/// Executes one kind of job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Queue this handler consumes.
    fn queue(&self) -> &str;

    /// Job name this handler executes.
    fn job_name(&self) -> &str;

    async fn execute(
        &self,
        ctx: &JobContext,
        payload: serde_json::Value,
    ) -> Result<JobOutput, HandlerError>;
}

// ============================================================================
// HandlerRegistry - Dispatch table keyed by (queue, job name)
// ============================================================================

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Register a handler. A later registration for the same key replaces the earlier one.
    pub fn register(&mut self, handler: impl JobHandler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn JobHandler>) {
        let key = (handler.queue().to_string(), handler.job_name().to_string());
        self.handlers.insert(key, handler);
    }

    pub fn get(&self, queue: &str, job_name: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers
            .get(&(queue.to_string(), job_name.to_string()))
    }

    /// Distinct queue names, sorted.
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.handlers.keys().map(|(q, _)| q.clone()).collect();
        queues.sort();
        queues.dedup();
        queues
    }

    /// Job names registered on a queue, sorted.
    pub fn job_names(&self, queue: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .filter(|(q, _)| q == queue)
            .map(|(_, j)| j.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &keys)
            .finish()
    }
}

/// Fluent builder for a [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(mut self, handler: impl JobHandler + 'static) -> Self {
        self.registry.register(handler);
        self
    }

    pub fn handler_arc(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.registry.register_arc(handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        self.registry
    }
}
