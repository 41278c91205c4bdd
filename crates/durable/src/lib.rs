//! # Durable Task Queue
//!
//! A PostgreSQL-backed job queue that delivers campaign workflow jobs to
//! workers at least once.
//!
//! ## Features
//!
//! - **Visibility-based scheduling**: delayed jobs and retry backoff are a
//!   `visible_at` timestamp, claimed with `FOR UPDATE SKIP LOCKED`
//! - **Automatic retries**: per-task retry policies with exponential backoff
//!   and jitter, dead-lettering once attempts run out
//! - **Stale task recovery**: heartbeats from running workers, reclamation of
//!   tasks whose worker went away
//! - **Worker pools**: one pool per queue, concurrency-limited, graceful
//!   shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DurableJobQueue                          │
//! │        (autopilot_core::JobQueue -> TaskQueueStore)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TaskQueueStore                           │
//! │          (PostgreSQL: queue_jobs / in-memory)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │    (claims tasks, runs TaskHandlers, sends heartbeats)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod persistence;
pub mod queue;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::persistence::{
        ClaimedTask, InMemoryTaskQueue, PostgresTaskQueue, StoreError, TaskDefinition,
        TaskFailureOutcome, TaskQueueStore, TaskStatus,
    };
    pub use crate::queue::DurableJobQueue;
    pub use crate::reliability::RetryPolicy;
    pub use crate::worker::{
        TaskError, TaskHandler, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    };
}

// Re-export key types at crate root
pub use persistence::{
    ClaimedTask, DeadTask, InMemoryTaskQueue, PostgresTaskQueue, QueueStats, StoreError,
    TaskDefinition, TaskFailureOutcome, TaskQueueStore, TaskStatus,
};
pub use queue::DurableJobQueue;
pub use reliability::RetryPolicy;
pub use worker::{
    PollerConfig, TaskError, TaskHandler, WorkerPool, WorkerPoolConfig, WorkerPoolError,
    WorkerPoolStatus,
};
