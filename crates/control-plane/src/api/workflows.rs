// Workflow run control HTTP routes
//
// Thin layer over the engine's run control API: the authenticated user becomes
// the engine Caller, and engine errors map onto status codes in ApiError.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use autopilot_core::{
    EngineError, RunDetail, RunStatus, RunSummary, StartAutomation, WorkflowEngine, WorkflowJob,
    WorkflowRun, WorkflowTemplate,
};

use super::common::{ApiError, ErrorResponse, ListResponse};
use crate::auth::{AuthState, AuthUser, FromRef};

/// App state for workflow routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub auth: AuthState,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>, auth: AuthState) -> Self {
        Self { engine, auth }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(input: &AppState) -> Self {
        input.auth.clone()
    }
}

/// Query parameters for listing runs
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ListRunsQuery {
    /// Only return runs in this status.
    pub status: Option<RunStatus>,
}

/// Request to start automation for a campaign
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartAutomationRequest {
    /// Plan tier of the campaign owner. Selects the workflow template.
    #[schema(example = "growth")]
    pub plan: String,
    /// Campaign type, used to prefer a type-specific template.
    #[serde(default)]
    #[schema(example = "launch")]
    pub campaign_type: Option<String>,
    #[serde(default)]
    pub business_profile: Option<Value>,
    #[serde(default)]
    pub audience_profile: Option<Value>,
    /// Free-text campaign goals.
    #[serde(default)]
    #[schema(example = "newsletter signups, store visits")]
    pub goals: Option<String>,
    #[serde(default)]
    #[schema(example = json!(["cold brew", "single origin"]))]
    pub focus_keywords: Option<Vec<String>>,
    /// Shown in notifications.
    #[serde(default)]
    pub campaign_name: Option<String>,
    /// Shown in notifications.
    #[serde(default)]
    pub user_email: Option<String>,
    /// Campaign owner. Defaults to the caller; only administrators may name another user.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

/// Result of starting automation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartAutomationResponse {
    /// The new or existing run, or null when no template matches the plan.
    pub run: Option<WorkflowRun>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows/runs", get(list_runs))
        .route("/v1/workflows/runs/:run_id", get(get_run))
        .route("/v1/workflows/runs/:run_id/pause", post(pause_run))
        .route("/v1/workflows/runs/:run_id/resume", post(resume_run))
        .route("/v1/workflows/runs/:run_id/cancel", post(cancel_run))
        .route("/v1/workflows/jobs/:job_id/retry", post(retry_job))
        .route("/v1/workflows/jobs/:job_id/cancel", post(cancel_job))
        .route(
            "/v1/workflows/campaigns/:campaign_id/automation",
            post(start_automation),
        )
        .route("/v1/workflows/templates", get(list_templates))
        .with_state(state)
}

/// GET /v1/workflows/runs - List runs visible to the caller
#[utoipa::path(
    get,
    path = "/v1/workflows/runs",
    params(ListRunsQuery),
    responses(
        (status = 200, description = "Runs, newest first", body = ListResponse<RunSummary>),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ListResponse<RunSummary>>, ApiError> {
    let runs = state.engine.list_runs(&user.caller(), query.status).await?;
    Ok(Json(ListResponse::new(runs)))
}

/// GET /v1/workflows/runs/{run_id} - Run with all of its jobs
#[utoipa::path(
    get,
    path = "/v1/workflows/runs/{run_id}",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run found", body = RunDetail),
        (status = 403, description = "Run belongs to another user", body = ErrorResponse),
        (status = 404, description = "Run not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunDetail>, ApiError> {
    Ok(Json(state.engine.get_run(run_id, &user.caller()).await?))
}

/// POST /v1/workflows/runs/{run_id}/pause - Stop dispatching new jobs
#[utoipa::path(
    post,
    path = "/v1/workflows/runs/{run_id}/pause",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run paused", body = WorkflowRun),
        (status = 403, description = "Run is terminal or belongs to another user", body = ErrorResponse),
        (status = 404, description = "Run not found", body = ErrorResponse),
        (status = 409, description = "Concurrent update", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn pause_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(run_id): Path<Uuid>,
) -> Result<Json<WorkflowRun>, ApiError> {
    Ok(Json(state.engine.pause_run(run_id, &user.caller()).await?))
}

/// POST /v1/workflows/runs/{run_id}/resume - Resume a paused run
#[utoipa::path(
    post,
    path = "/v1/workflows/runs/{run_id}/resume",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run resumed", body = WorkflowRun),
        (status = 403, description = "Run is not paused or belongs to another user", body = ErrorResponse),
        (status = 404, description = "Run not found", body = ErrorResponse),
        (status = 503, description = "Queue unavailable", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn resume_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(run_id): Path<Uuid>,
) -> Result<Json<WorkflowRun>, ApiError> {
    Ok(Json(state.engine.resume_run(run_id, &user.caller()).await?))
}

/// POST /v1/workflows/runs/{run_id}/cancel - Cancel a run (admin only)
#[utoipa::path(
    post,
    path = "/v1/workflows/runs/{run_id}/cancel",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run cancelled", body = WorkflowRun),
        (status = 403, description = "Administrator role required or run is terminal", body = ErrorResponse),
        (status = 404, description = "Run not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn cancel_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(run_id): Path<Uuid>,
) -> Result<Json<WorkflowRun>, ApiError> {
    Ok(Json(state.engine.cancel_run(run_id, &user.caller()).await?))
}

/// POST /v1/workflows/jobs/{job_id}/retry - Re-enqueue a failed job
#[utoipa::path(
    post,
    path = "/v1/workflows/jobs/{job_id}/retry",
    params(
        ("job_id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job re-enqueued", body = WorkflowJob),
        (status = 403, description = "Job is not failed or belongs to another user", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse),
        (status = 503, description = "Queue unavailable", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn retry_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<WorkflowJob>, ApiError> {
    Ok(Json(state.engine.retry_job(job_id, &user.caller()).await?))
}

/// POST /v1/workflows/jobs/{job_id}/cancel - Cancel a pending or queued job (admin only)
#[utoipa::path(
    post,
    path = "/v1/workflows/jobs/{job_id}/cancel",
    params(
        ("job_id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job cancelled", body = WorkflowJob),
        (status = 403, description = "Administrator role required or job already started", body = ErrorResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<Uuid>,
) -> Result<Json<WorkflowJob>, ApiError> {
    Ok(Json(state.engine.cancel_job(job_id, &user.caller()).await?))
}

/// POST /v1/workflows/campaigns/{campaign_id}/automation - Start campaign automation
///
/// Returns the campaign's existing run when one is already in progress.
#[utoipa::path(
    post,
    path = "/v1/workflows/campaigns/{campaign_id}/automation",
    params(
        ("campaign_id" = Uuid, Path, description = "Campaign ID")
    ),
    request_body = StartAutomationRequest,
    responses(
        (status = 201, description = "Run started or already present", body = StartAutomationResponse),
        (status = 200, description = "No template matches the plan", body = StartAutomationResponse),
        (status = 403, description = "Cannot start automation for another user", body = ErrorResponse),
        (status = 503, description = "Queue unavailable", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn start_automation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<StartAutomationRequest>,
) -> Result<(StatusCode, Json<StartAutomationResponse>), ApiError> {
    let owner = req.user_id.unwrap_or(user.id);
    if owner != user.id && !user.is_admin() {
        return Err(EngineError::forbidden("cannot start automation for another user").into());
    }

    let run = state
        .engine
        .start_campaign_automation(StartAutomation {
            campaign_id,
            user_id: owner,
            plan: req.plan,
            campaign_type: req.campaign_type,
            business_profile: req.business_profile,
            audience_profile: req.audience_profile,
            goals: req.goals,
            focus_keywords: req.focus_keywords,
            campaign_name: req.campaign_name,
            user_email: req.user_email,
        })
        .await?;

    let status = if run.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(StartAutomationResponse { run })))
}

/// GET /v1/workflows/templates - Active workflow templates
#[utoipa::path(
    get,
    path = "/v1/workflows/templates",
    responses(
        (status = 200, description = "Active templates", body = ListResponse<WorkflowTemplate>)
    ),
    tag = "workflows"
)]
pub async fn list_templates(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<ListResponse<WorkflowTemplate>> {
    let templates = state
        .engine
        .templates()
        .list()
        .into_iter()
        .filter(|t| t.is_active)
        .map(|t| t.as_ref().clone())
        .collect();
    Json(ListResponse::new(templates))
}
