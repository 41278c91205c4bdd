// Storage backend abstraction
// Decision: Use enum dispatch to pick the backend once at startup
//
// PostgreSQL (production) or in-memory (dev mode). Either way the engine sees
// the same trait objects for the workflow store, the social directory and the
// task queue.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use autopilot_core::memory::{InMemorySocialDirectory, InMemoryWorkflowStore};
use autopilot_core::{SocialDirectory, WorkflowStore};
use autopilot_durable::{InMemoryTaskQueue, PostgresTaskQueue, TaskQueueStore};

use crate::repositories::Database;
use crate::social_directory::DbSocialDirectory;
use crate::workflow_store::DbWorkflowStore;

/// In-memory state shared by every handle of a dev-mode backend.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    pub store: InMemoryWorkflowStore,
    pub directory: InMemorySocialDirectory,
    pub tasks: Arc<InMemoryTaskQueue>,
}

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory state (dev mode)
    InMemory(InMemoryBackend),
}

impl StorageBackend {
    /// Connect to PostgreSQL and apply migrations.
    pub async fn postgres(database_url: &str) -> Result<Self> {
        let db = Database::from_url(database_url).await?;
        db.migrate().await?;
        Ok(Self::Postgres(db))
    }

    pub fn in_memory() -> Self {
        Self::InMemory(InMemoryBackend::default())
    }

    /// PostgreSQL when `database_url` is set, in-memory otherwise.
    pub async fn connect(database_url: Option<&str>) -> Result<Self> {
        match database_url {
            Some(url) if !url.trim().is_empty() => {
                info!("using PostgreSQL storage");
                Self::postgres(url).await
            }
            _ => {
                info!("DATABASE_URL not set, using in-memory storage (dev mode)");
                Ok(Self::in_memory())
            }
        }
    }

    /// Reads `DATABASE_URL`.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("DATABASE_URL").ok();
        Self::connect(url.as_deref()).await
    }

    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Returns None for the in-memory backend
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(db) => Some(db.pool()),
            Self::InMemory(_) => None,
        }
    }

    pub fn workflow_store(&self) -> Arc<dyn WorkflowStore> {
        match self {
            Self::Postgres(db) => Arc::new(DbWorkflowStore::new(db.clone())),
            Self::InMemory(mem) => Arc::new(mem.store.clone()),
        }
    }

    pub fn social_directory(&self) -> Arc<dyn SocialDirectory> {
        match self {
            Self::Postgres(db) => Arc::new(DbSocialDirectory::new(db.clone())),
            Self::InMemory(mem) => Arc::new(mem.directory.clone()),
        }
    }

    pub fn task_queue(&self) -> Arc<dyn TaskQueueStore> {
        match self {
            Self::Postgres(db) => Arc::new(PostgresTaskQueue::new(db.pool().clone())),
            Self::InMemory(mem) => mem.tasks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::RunFilter;
    use autopilot_durable::TaskDefinition;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_without_url_is_dev_mode() {
        let backend = StorageBackend::connect(None).await.unwrap();
        assert!(backend.is_dev_mode());
        assert!(backend.pool().is_none());

        let blank = StorageBackend::connect(Some("  ")).await.unwrap();
        assert!(blank.is_dev_mode());
    }

    #[tokio::test]
    async fn test_in_memory_handles_share_state() {
        let backend = StorageBackend::in_memory();

        let queue_a = backend.task_queue();
        let queue_b = backend.task_queue();
        queue_a
            .enqueue(TaskDefinition::new("social", "social.draft", json!({})))
            .await
            .unwrap();
        let stats = queue_b.stats("social").await.unwrap();
        assert_eq!(stats.pending, 1);

        let store = backend.workflow_store();
        assert!(store.list_runs(RunFilter::default()).await.unwrap().is_empty());
    }
}
