// Authentication
//
// Tokens are issued by the campaign platform; this service only verifies them.

pub mod config;
pub mod jwt;
pub mod middleware;

pub use config::{AuthConfig, AuthMode};
pub use middleware::{AuthError, AuthState, AuthUser, FromRef};
