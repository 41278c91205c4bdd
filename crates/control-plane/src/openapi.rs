// OpenAPI specification generation
//
// Shared by the API server (for Swagger UI) and the export-openapi binary
// (for static spec generation).

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use autopilot_core::{
    JobCounts, JobMetadata, JobStatus, RunDetail, RunStatus, RunSummary, Step, WorkflowJob,
    WorkflowRun, WorkflowTemplate,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the Autopilot workflow API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::workflows::list_runs,
        api::workflows::get_run,
        api::workflows::pause_run,
        api::workflows::resume_run,
        api::workflows::cancel_run,
        api::workflows::retry_job,
        api::workflows::cancel_job,
        api::workflows::start_automation,
        api::workflows::list_templates,
    ),
    components(
        schemas(
            WorkflowRun, RunStatus, RunSummary, RunDetail, JobCounts,
            WorkflowJob, JobStatus, JobMetadata,
            WorkflowTemplate, Step,
            api::workflows::ListRunsQuery,
            api::workflows::StartAutomationRequest,
            api::workflows::StartAutomationResponse,
            ErrorResponse,
            ListResponse<RunSummary>,
            ListResponse<WorkflowTemplate>,
        )
    ),
    tags(
        (name = "workflows", description = "Campaign workflow runs, jobs and templates")
    ),
    info(
        title = "Autopilot API",
        version = "0.2.0",
        description = "API for starting campaign automation and controlling workflow runs",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> serde_json::Result<String> {
        Self::openapi().to_pretty_json()
    }
}
