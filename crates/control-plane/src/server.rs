// HTTP server assembly
// Decision: /health is never prefixed so load balancers need no knowledge of API_PREFIX
// Decision: CORS is only enabled when origins are configured (same-origin by default)

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use autopilot_core::WorkflowEngine;

use crate::api;
use crate::auth::{AuthConfig, AuthState};
use crate::openapi::ApiDoc;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:9000)
    pub http_addr: String,
    /// Prefix for every API route, e.g. "/api"
    pub api_prefix: String,
    pub cors_origins: Vec<HeaderValue>,
    /// Run worker pools inside the API process
    pub embedded_worker: Option<bool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:9000".to_string(),
            api_prefix: String::new(),
            cors_origins: Vec::new(),
            embedded_worker: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// - `HTTP_ADDR`: listen address
    /// - `API_PREFIX`: e.g. `/api` results in routes like `/api/v1/workflows/runs`
    /// - `CORS_ALLOWED_ORIGINS`: comma-separated origins, only needed when the UI
    ///   is served from a different origin than the API
    /// - `EMBEDDED_WORKER`: `true`/`false`; unset means "only in dev mode"
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_addr: std::env::var("HTTP_ADDR")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.http_addr),
            api_prefix: std::env::var("API_PREFIX").unwrap_or_default(),
            cors_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .map(|s| parse_cors_origins(&s))
                .unwrap_or_default(),
            embedded_worker: std::env::var("EMBEDDED_WORKER")
                .ok()
                .map(|s| s.to_lowercase() == "true" || s == "1"),
        }
    }

    /// Whether to embed a worker, given whether storage is in dev mode
    pub fn embed_worker(&self, dev_mode: bool) -> bool {
        self.embedded_worker.unwrap_or(dev_mode)
    }
}

pub fn parse_cors_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    auth_mode: &'static str,
    storage: &'static str,
}

/// State for health endpoint
#[derive(Clone)]
struct HealthState {
    auth_mode: &'static str,
    storage: &'static str,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        auth_mode: state.auth_mode,
        storage: state.storage,
    })
}

/// Build the full application router.
pub fn build_app(
    engine: Arc<WorkflowEngine>,
    auth_config: AuthConfig,
    config: &ServerConfig,
    dev_mode: bool,
) -> Router {
    let health_state = HealthState {
        auth_mode: auth_config.mode.as_str(),
        storage: if dev_mode { "memory" } else { "postgres" },
    };
    let auth_state = AuthState::new(auth_config);

    let api_routes = Router::new().merge(api::workflows::routes(api::workflows::AppState::new(
        engine, auth_state,
    )));

    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(build_router_with_prefix(api_routes, &config.api_prefix))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let app = if config.cors_origins.is_empty() {
        app
    } else {
        app.layer(cors_layer(config.cors_origins.clone()))
    };

    app.layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            header::CACHE_CONTROL,
        ])
        .allow_credentials(true)
}

/// Build router with optional API prefix
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_routes() -> Router {
        Router::new().route("/v1/test", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_api_prefix_empty() {
        let app = build_router_with_prefix(test_routes(), "");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_api_prefix_set() {
        let app = build_router_with_prefix(test_routes(), "/api");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        // Route should NOT work without prefix
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn test_parse_cors_origins() {
        let origins = parse_cors_origins("https://app.example.com, ,https://admin.example.com");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1], "https://admin.example.com");
    }

    #[test]
    fn test_embed_worker_defaults_to_dev_mode() {
        let config = ServerConfig::default();
        assert!(config.embed_worker(true));
        assert!(!config.embed_worker(false));

        let forced = ServerConfig {
            embedded_worker: Some(true),
            ..Default::default()
        };
        assert!(forced.embed_worker(false));
    }
}
