//! Task handler contract

use async_trait::async_trait;

use autopilot_core::HandlerError;

use crate::persistence::ClaimedTask;

/// Failure reported by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    /// Whether the queue should deliver the task again (attempts permitting)
    pub retryable: bool,
}

impl TaskError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<HandlerError> for TaskError {
    fn from(e: HandlerError) -> Self {
        Self {
            retryable: e.is_retryable(),
            message: e.chain().join(": "),
        }
    }
}

/// Executes claimed tasks of one or more job names.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: ClaimedTask) -> Result<(), TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::HandlerErrorKind;

    #[test]
    fn test_from_handler_error_keeps_retryability() {
        let limited = TaskError::from(HandlerError::new(HandlerErrorKind::RateLimited, "slow down"));
        assert!(limited.retryable);
        assert!(limited.message.contains("slow down"));

        let invalid = TaskError::from(HandlerError::validation("missing topic"));
        assert!(!invalid.retryable);

        let auth = TaskError::from(HandlerError::new(HandlerErrorKind::Unauthorized, "token"));
        assert!(!auth.retryable);
    }
}
