// Autopilot Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and HTTP tests

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Authentication module
pub mod auth;

// OpenAPI spec generation
pub mod openapi;

// Router assembly and server configuration
pub mod server;

pub use server::{build_app, ServerConfig};
