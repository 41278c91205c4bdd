// HTTP tests for the workflow API
// Run with: cargo test -p autopilot-control-plane --test workflows_api
// Uses in-memory storage; no worker consumes the queue, so runs stay where dispatch leaves them.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use autopilot_control_plane::auth::config::JwtConfig;
use autopilot_control_plane::auth::jwt::{JwtService, ADMIN_ROLE};
use autopilot_control_plane::auth::{AuthConfig, AuthMode};
use autopilot_control_plane::{build_app, ServerConfig};
use autopilot_core::WorkflowEngine;
use autopilot_storage::StorageBackend;
use autopilot_worker::{WorkerConfig, WorkerRuntime};

const SECRET: &str = "workflows-api-test-secret";

async fn engine() -> Arc<WorkflowEngine> {
    let runtime = WorkerRuntime::from_backend(&StorageBackend::in_memory(), &WorkerConfig::default())
        .await
        .expect("runtime");
    runtime.engine
}

fn jwt_auth() -> AuthConfig {
    AuthConfig {
        mode: AuthMode::Jwt,
        jwt: JwtConfig {
            secret: SECRET.to_string(),
            access_token_lifetime: Duration::from_secs(600),
        },
    }
}

fn token(user_id: Uuid, admin: bool) -> String {
    let roles = if admin {
        vec![ADMIN_ROLE.to_string()]
    } else {
        vec!["user".to_string()]
    };
    JwtService::new(jwt_auth().jwt)
        .generate_access_token(user_id, &roles)
        .expect("token")
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn start_body(plan: &str) -> Value {
    json!({
        "plan": plan,
        "goals": "wholesale cafe partners",
        "focus_keywords": ["cold brew"],
        "business_profile": { "industry": "coffee roasting" },
        "campaign_name": "Spring beans"
    })
}

#[tokio::test]
async fn test_health_is_unprefixed() {
    let config = ServerConfig {
        api_prefix: "/api".to_string(),
        ..Default::default()
    };
    let app = build_app(engine().await, AuthConfig::default(), &config, true);

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["auth_mode"], "none");
    assert_eq!(body["storage"], "memory");

    let (status, _) = send(&app, "GET", "/api/v1/workflows/templates", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/v1/workflows/templates", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_templates_are_listed() {
    let app = build_app(engine().await, AuthConfig::default(), &ServerConfig::default(), true);

    let (status, body) = send(&app, "GET", "/v1/workflows/templates", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let slugs: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["slug"].as_str().unwrap())
        .collect();
    assert!(slugs.contains(&"starter-content-engine"));
    assert!(slugs.contains(&"agency-launch-blitz"));
}

#[tokio::test]
async fn test_start_automation_and_control_run() {
    let app = build_app(engine().await, AuthConfig::default(), &ServerConfig::default(), true);
    let campaign_id = Uuid::now_v7();
    let uri = format!("/v1/workflows/campaigns/{}/automation", campaign_id);

    let (status, body) = send(&app, "POST", &uri, None, Some(start_body("starter"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let run_id = body["run"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["run"]["template_slug"], "starter-content-engine");
    assert_eq!(body["run"]["campaign_id"], campaign_id.to_string());

    // Starting again returns the same run
    let (status, again) = send(&app, "POST", &uri, None, Some(start_body("starter"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(again["run"]["id"], run_id);

    let (status, list) = send(&app, "GET", "/v1/workflows/runs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
    assert!(list["data"][0]["job_counts"].is_object());

    let (status, detail) = send(&app, "GET", &format!("/v1/workflows/runs/{}", run_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = detail["jobs"].as_array().unwrap();
    assert!(!jobs.is_empty());
    assert_eq!(jobs[0]["step_id"], "keyword-research");
    assert_eq!(jobs[0]["status"], "queued");

    let (status, paused) = send(&app, "POST", &format!("/v1/workflows/runs/{}/pause", run_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["status"], "paused");

    let (_, filtered) = send(&app, "GET", "/v1/workflows/runs?status=paused", None, None).await;
    assert_eq!(filtered["data"].as_array().unwrap().len(), 1);
    let (_, filtered) = send(&app, "GET", "/v1/workflows/runs?status=completed", None, None).await;
    assert!(filtered["data"].as_array().unwrap().is_empty());

    let (status, resumed) = send(&app, "POST", &format!("/v1/workflows/runs/{}/resume", run_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["status"], "active");

    // Resuming an active run is rejected
    let (status, err) = send(&app, "POST", &format!("/v1/workflows/runs/{}/resume", run_id), None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(err["error"].as_str().unwrap().contains("cannot resume"));
}

#[tokio::test]
async fn test_unknown_plan_returns_null_run() {
    let app = build_app(engine().await, AuthConfig::default(), &ServerConfig::default(), true);
    let uri = format!("/v1/workflows/campaigns/{}/automation", Uuid::now_v7());

    let (status, body) = send(&app, "POST", &uri, None, Some(start_body("enterprise"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["run"].is_null());
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let app = build_app(engine().await, AuthConfig::default(), &ServerConfig::default(), true);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/v1/workflows/runs/{}", Uuid::now_v7()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/workflows/jobs/{}/retry", Uuid::now_v7()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_jwt_mode_enforces_ownership_and_admin_role() {
    let app = build_app(engine().await, jwt_auth(), &ServerConfig::default(), false);
    let owner = Uuid::now_v7();
    let owner_token = token(owner, false);
    let stranger_token = token(Uuid::now_v7(), false);
    let admin_token = token(Uuid::now_v7(), true);

    let (status, _) = send(&app, "GET", "/v1/workflows/runs", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = format!("/v1/workflows/campaigns/{}/automation", Uuid::now_v7());
    let (status, body) = send(&app, "POST", &uri, Some(&owner_token), Some(start_body("growth"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["run"]["user_id"], owner.to_string());
    let run_id = body["run"]["id"].as_str().unwrap().to_string();

    // A user cannot start automation on someone else's behalf
    let mut on_behalf = start_body("growth");
    on_behalf["user_id"] = json!(owner);
    let other_campaign = format!("/v1/workflows/campaigns/{}/automation", Uuid::now_v7());
    let (status, _) = send(&app, "POST", &other_campaign, Some(&stranger_token), Some(on_behalf)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let run_uri = format!("/v1/workflows/runs/{}", run_id);
    let (status, _) = send(&app, "GET", &run_uri, Some(&stranger_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, stranger_list) = send(&app, "GET", "/v1/workflows/runs", Some(&stranger_token), None).await;
    assert!(stranger_list["data"].as_array().unwrap().is_empty());
    let (_, admin_list) = send(&app, "GET", "/v1/workflows/runs", Some(&admin_token), None).await;
    assert_eq!(admin_list["data"].as_array().unwrap().len(), 1);

    // Cancelling is admin only, even for the owner
    let cancel_uri = format!("{}/cancel", run_uri);
    let (status, _) = send(&app, "POST", &cancel_uri, Some(&owner_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = send(&app, "POST", &cancel_uri, Some(&admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (_, detail) = send(&app, "GET", &run_uri, Some(&owner_token), None).await;
    assert!(detail["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .all(|job| job["status"] == "cancelled"));
}

#[tokio::test]
async fn test_cancel_then_retry_job() {
    let app = build_app(engine().await, AuthConfig::default(), &ServerConfig::default(), true);
    let uri = format!("/v1/workflows/campaigns/{}/automation", Uuid::now_v7());
    let (_, body) = send(&app, "POST", &uri, None, Some(start_body("starter"))).await;
    let run_id = body["run"]["id"].as_str().unwrap().to_string();

    let (_, detail) = send(&app, "GET", &format!("/v1/workflows/runs/{}", run_id), None, None).await;
    let pending = detail["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|job| job["status"] == "pending")
        .expect("a pending job")
        .clone();
    let job_id = pending["id"].as_str().unwrap();

    let (status, cancelled) = send(&app, "POST", &format!("/v1/workflows/jobs/{}/cancel", job_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    // Cancelling twice is rejected
    let (status, _) = send(&app, "POST", &format!("/v1/workflows/jobs/{}/cancel", job_id), None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, retried) = send(&app, "POST", &format!("/v1/workflows/jobs/{}/retry", job_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["status"], "queued");
}
