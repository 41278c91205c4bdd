//! Worker pool for task execution
//!
//! - [`WorkerPool`] - claims tasks of one queue and runs them under a
//!   concurrency limit
//! - [`TaskPoller`] - polling with exponential backoff while idle
//! - [`TaskHandler`] - the contract a job implementation fulfils
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      WorkerPool                        │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────────┐  │
//! │  │ TaskPoller │  │ Heartbeat  │  │ Stale Reclaimer  │  │
//! │  └─────┬──────┘  └────────────┘  └──────────────────┘  │
//! │        ▼                                               │
//! │  ┌─────────────────────────────────────────────────┐   │
//! │  │   Task Executor (Semaphore-limited)             │   │
//! │  │   handler.handle(task) -> complete / fail       │   │
//! │  └─────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────┘
//! ```

mod handler;
mod poller;
mod pool;

pub use handler::{TaskError, TaskHandler};
pub use poller::{PollerConfig, PollerError, TaskPoller};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
