// HTTP API routes
//
// Each submodule handles a specific resource type with its own AppState.

pub mod common;
pub mod workflows;

// Re-export common types
pub use common::{ApiError, ErrorResponse, ListResponse};
