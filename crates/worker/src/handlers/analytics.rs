// analytics.setup: provision campaign tracking

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use autopilot_core::queues::{ANALYTICS_QUEUE, ANALYTICS_SETUP_JOB};
use autopilot_core::{AnalyticsService, HandlerError, JobContext, JobHandler, JobOutput};

use super::{parse_payload, string_list};

#[derive(Debug, Deserialize)]
struct AnalyticsPayload {
    #[serde(default)]
    goals: Value,
}

pub struct AnalyticsSetupHandler {
    analytics: Arc<dyn AnalyticsService>,
}

impl AnalyticsSetupHandler {
    pub fn new(analytics: Arc<dyn AnalyticsService>) -> Self {
        Self { analytics }
    }
}

#[async_trait]
impl JobHandler for AnalyticsSetupHandler {
    fn queue(&self) -> &str {
        ANALYTICS_QUEUE
    }

    fn job_name(&self) -> &str {
        ANALYTICS_SETUP_JOB
    }

    async fn execute(&self, ctx: &JobContext, payload: Value) -> Result<JobOutput, HandlerError> {
        let payload: AnalyticsPayload = parse_payload(payload)?;
        let goals = string_list(Some(&payload.goals));

        let setup = self
            .analytics
            .setup_tracking(ctx.user_id, ctx.campaign_id, goals)
            .await?;
        info!(tracking_id = %setup.tracking_id, goals = setup.goals.len(), "tracking provisioned");

        let summary = json!({ "tracking_id": setup.tracking_id, "goals": setup.goals });
        Ok(JobOutput::new(summary.clone()).with_metadata("analytics", summary))
    }
}
