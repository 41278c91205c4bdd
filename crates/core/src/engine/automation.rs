// Campaign automation start
//
// Resolves a template for the campaign's plan, renders every step payload
// against the run context and materializes the run with all of its jobs in one
// store transaction, then runs the first dispatch pass.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{DispatchReason, WorkflowEngine};
use crate::error::Result;
use crate::job::{JobMetadata, JobStatus, NewJob};
use crate::run::{NewRun, RunStatus, WorkflowRun};

/// Inputs for starting automation on a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAutomation {
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    /// Plan tier used for template resolution.
    pub plan: String,
    #[serde(default)]
    pub campaign_type: Option<String>,
    #[serde(default)]
    pub business_profile: Option<Value>,
    #[serde(default)]
    pub audience_profile: Option<Value>,
    #[serde(default)]
    pub goals: Option<String>,
    #[serde(default)]
    pub focus_keywords: Option<Vec<String>>,
    /// Used in notifications.
    #[serde(default)]
    pub campaign_name: Option<String>,
    /// Used in notifications.
    #[serde(default)]
    pub user_email: Option<String>,
}

impl StartAutomation {
    /// Context that step payload templates are rendered against.
    fn render_context(&self) -> Value {
        json!({
            "campaign_id": self.campaign_id,
            "user_id": self.user_id,
            "plan": self.plan,
            "campaign_type": self.campaign_type,
            "business_profile": self.business_profile.clone().unwrap_or_else(|| json!({})),
            "audience_profile": self.audience_profile.clone().unwrap_or_else(|| json!({})),
            "goals": self.goals,
            "focus_keywords": self.focus_keywords.clone().unwrap_or_default(),
        })
    }
}

impl WorkflowEngine {
    /// Start automation for a campaign.
    ///
    /// Returns the campaign's existing non-cancelled run if there is one, and
    /// `Ok(None)` when no template matches the plan.
    #[instrument(skip(self, request), fields(campaign_id = %request.campaign_id, plan = %request.plan))]
    pub async fn start_campaign_automation(
        &self,
        request: StartAutomation,
    ) -> Result<Option<WorkflowRun>> {
        if let Some(existing) = self
            .store
            .find_existing_run_for_campaign(request.campaign_id)
            .await?
        {
            info!(run_id = %existing.id, status = %existing.status, "campaign already has a workflow run");
            // A start whose first pass failed to enqueue is picked up again here.
            if matches!(existing.status, RunStatus::Pending | RunStatus::Active) {
                self.dispatch(existing.id, DispatchReason::RunStarted)
                    .await?;
                return Ok(Some(self.load_run(existing.id).await?));
            }
            return Ok(Some(existing));
        }

        let Some(template) = self
            .templates
            .resolve(&request.plan, request.campaign_type.as_deref())
        else {
            warn!(
                campaign_type = ?request.campaign_type,
                "no workflow template matches plan, automation not started"
            );
            return Ok(None);
        };

        let context = request.render_context();
        let mut jobs = Vec::with_capacity(template.steps.len());
        for step in &template.steps {
            let mut payload = self.renderer.render(&step.payload, &context)?;
            if !payload.is_object() {
                payload = json!({ "value": payload });
            }
            if let Some(map) = payload.as_object_mut() {
                map.insert("campaign_id".to_string(), json!(request.campaign_id));
                map.insert("user_id".to_string(), json!(request.user_id));
            }
            jobs.push(NewJob {
                step_id: step.id.clone(),
                queue_name: step.queue.clone(),
                job_name: step.job.clone(),
                status: JobStatus::Pending,
                payload,
                scheduled_for: None,
                metadata: JobMetadata::new(step.depends_on.clone(), step.continue_on_fail),
            });
        }

        let mut metadata = context;
        if let Some(map) = metadata.as_object_mut() {
            map.insert("template_version".to_string(), json!(template.version));
            if let Some(name) = &request.campaign_name {
                map.insert("campaign_name".to_string(), json!(name));
            }
            if let Some(email) = &request.user_email {
                map.insert("user_email".to_string(), json!(email));
            }
        }

        let (run, jobs) = self
            .store
            .create_run(
                NewRun {
                    campaign_id: request.campaign_id,
                    user_id: request.user_id,
                    template_id: template.id,
                    template_slug: template.slug.clone(),
                    metadata,
                },
                jobs,
            )
            .await?;
        info!(
            run_id = %run.id,
            template = %template.slug,
            version = template.version,
            jobs = jobs.len(),
            "workflow run created"
        );

        self.dispatch(run.id, DispatchReason::RunStarted).await?;
        Ok(Some(self.load_run(run.id).await?))
    }
}
