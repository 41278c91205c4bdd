//! Reliability patterns for the task queue
//!
//! - [`RetryPolicy`] - redelivery with exponential backoff

mod retry;

pub use retry::RetryPolicy;
