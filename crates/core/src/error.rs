// Error types for the workflow engine

use thiserror::Error;
use uuid::Uuid;

use crate::template::TemplateError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by a [`WorkflowStore`](crate::traits::WorkflowStore) implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Run not found
    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// Job not found
    #[error("workflow job not found: {0}")]
    JobNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by a [`JobQueue`](crate::traits::JobQueue) implementation
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue backend could not accept the job
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by the engine and the run control API
#[derive(Debug, Error)]
pub enum EngineError {
    /// Entity not found
    #[error("{0} not found")]
    NotFound(String),

    /// Caller may not perform the operation, or the entity is in the wrong state for it
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A compare-and-set update lost a race and could not be retried
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    /// Persistence error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Queue backend error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Template or payload template error
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

impl EngineError {
    pub fn run_not_found(run_id: Uuid) -> Self {
        EngineError::NotFound(format!("workflow run {}", run_id))
    }

    pub fn job_not_found(job_id: Uuid) -> Self {
        EngineError::NotFound(format!("workflow job {}", job_id))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        EngineError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }
}
