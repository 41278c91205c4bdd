// Postgres storage layer with sqlx
//
// This crate provides database implementations for core traits:
// - DbWorkflowStore: implements WorkflowStore for templates, runs and jobs
// - DbSocialDirectory: implements SocialDirectory for posts and accounts
// - StorageBackend: picks PostgreSQL or in-memory at startup
//
// Migrations (including the durable queue_jobs table) live in ./migrations.

pub mod backend;
pub mod models;
pub mod repositories;
pub mod social_directory;
pub mod workflow_store;

pub use backend::{InMemoryBackend, StorageBackend};
pub use models::*;
pub use repositories::Database;
pub use social_directory::DbSocialDirectory;
pub use workflow_store::DbWorkflowStore;
