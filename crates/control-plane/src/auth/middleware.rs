// Authentication middleware and extractors
// Decision: Support both cookie-based (UI) and header-based (API) auth
// Decision: In "none" mode, every request acts as an anonymous administrator

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use autopilot_core::Caller;

use super::{
    config::{AuthConfig, AuthMode},
    jwt::{JwtService, ADMIN_ROLE},
};

/// Authentication error
#[derive(Debug, Clone, Serialize)]
pub struct AuthError {
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl AuthError {
    pub fn unauthorized(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Authenticated user context extracted from request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub roles: Vec<String>,
    pub auth_method: AuthMethod,
}

impl AuthUser {
    /// Anonymous user for no-auth mode
    pub fn anonymous() -> Self {
        Self {
            id: Uuid::nil(),
            roles: vec![ADMIN_ROLE.to_string()], // Full access in no-auth mode
            auth_method: AuthMethod::None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// Identity handed to the run control API
    pub fn caller(&self) -> Caller {
        if self.is_admin() {
            Caller::admin(self.id)
        } else {
            Caller::user(self.id)
        }
    }
}

/// Authentication method used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication (anonymous)
    None,
    /// JWT access token
    Jwt,
}

/// Auth state shared across routes
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub jwt_service: Arc<JwtService>,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
        Self {
            config,
            jwt_service,
        }
    }
}

/// Extractor for authenticated user
/// This is required - returns 401 if not authenticated
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        extract_auth_user(parts, &auth_state)
    }
}

/// Helper trait for extracting AuthState from application state
pub trait FromRef<T> {
    fn from_ref(input: &T) -> Self;
}

impl FromRef<AuthState> for AuthState {
    fn from_ref(input: &AuthState) -> Self {
        input.clone()
    }
}

/// Extract authenticated user from request
fn extract_auth_user(parts: &Parts, auth_state: &AuthState) -> Result<AuthUser, AuthError> {
    if auth_state.config.mode == AuthMode::None {
        return Ok(AuthUser::anonymous());
    }

    // Authorization header first
    if let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::unauthorized("Invalid authorization header"))?;

        return match auth_str.strip_prefix("Bearer ") {
            Some(token) => validate_jwt_token(token.trim(), auth_state),
            None => Err(AuthError::unauthorized("Unsupported authorization scheme")),
        };
    }

    // Then the UI cookie
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get("access_token") {
        return validate_jwt_token(cookie.value(), auth_state);
    }

    Err(AuthError::unauthorized("Authentication required"))
}

fn validate_jwt_token(token: &str, auth_state: &AuthState) -> Result<AuthUser, AuthError> {
    let claims = auth_state
        .jwt_service
        .validate_access_token(token)
        .map_err(|e| {
            tracing::debug!("JWT validation failed: {}", e);
            AuthError::unauthorized("Invalid or expired token")
        })?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AuthError::unauthorized("Invalid user ID in token"))?;

    Ok(AuthUser {
        id: user_id,
        roles: claims.roles,
        auth_method: AuthMethod::Jwt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::JwtConfig;
    use axum::http::Request;
    use std::time::Duration;

    fn jwt_state() -> AuthState {
        AuthState::new(AuthConfig {
            mode: AuthMode::Jwt,
            jwt: JwtConfig {
                secret: "middleware-test-secret".to_string(),
                access_token_lifetime: Duration::from_secs(600),
            },
        })
    }

    fn parts(header: Option<(&str, String)>) -> Parts {
        let mut builder = Request::builder().uri("/v1/workflows/runs");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_none_mode_is_anonymous_admin() {
        let state = AuthState::new(AuthConfig::default());
        let user = extract_auth_user(&parts(None), &state).unwrap();
        assert_eq!(user.auth_method, AuthMethod::None);
        assert_eq!(user.caller(), Caller::admin(Uuid::nil()));
    }

    #[test]
    fn test_bearer_token() {
        let state = jwt_state();
        let user_id = Uuid::now_v7();
        let token = state
            .jwt_service
            .generate_access_token(user_id, &["user".to_string()])
            .unwrap();

        let user = extract_auth_user(
            &parts(Some(("authorization", format!("Bearer {}", token)))),
            &state,
        )
        .unwrap();
        assert_eq!(user.caller(), Caller::user(user_id));
        assert_eq!(user.auth_method, AuthMethod::Jwt);
    }

    #[test]
    fn test_cookie_token() {
        let state = jwt_state();
        let token = state
            .jwt_service
            .generate_access_token(Uuid::nil(), &[ADMIN_ROLE.to_string()])
            .unwrap();

        let user = extract_auth_user(
            &parts(Some(("cookie", format!("access_token={}", token)))),
            &state,
        )
        .unwrap();
        assert!(user.is_admin());
    }

    #[test]
    fn test_missing_or_bad_credentials() {
        let state = jwt_state();

        let err = extract_auth_user(&parts(None), &state).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err = extract_auth_user(
            &parts(Some(("authorization", "Bearer not-a-jwt".to_string()))),
            &state,
        )
        .unwrap_err();
        assert_eq!(err.error, "Invalid or expired token");

        let err = extract_auth_user(
            &parts(Some(("authorization", "Basic dXNlcjpwYXNz".to_string()))),
            &state,
        )
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
