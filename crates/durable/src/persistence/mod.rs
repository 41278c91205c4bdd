//! Persistence layer for the task queue
//!
//! - [`TaskQueueStore`] trait for task persistence and claiming
//! - [`InMemoryTaskQueue`] for dev mode and tests
//! - [`PostgresTaskQueue`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryTaskQueue;
pub use postgres::PostgresTaskQueue;
pub use store::{
    ClaimedTask, DeadTask, QueueStats, StoreError, TaskDefinition, TaskFailureOutcome,
    TaskQueueStore, TaskStatus,
};
