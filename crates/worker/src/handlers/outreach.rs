// outreach.draft: outreach email drafts for the campaign audience

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use autopilot_core::queues::{OUTREACH_DRAFT_JOB, OUTREACH_QUEUE};
use autopilot_core::{
    GenerationRequest, GenerationService, HandlerError, JobContext, JobHandler, JobOutput,
};

use super::{parse_payload, run_keywords};

const MAX_DRAFTS: u32 = 50;

#[derive(Debug, Deserialize)]
struct OutreachPayload {
    #[serde(default)]
    audience: Value,
    #[serde(default)]
    count: Option<u32>,
}

pub struct OutreachDraftHandler {
    generation: Arc<dyn GenerationService>,
}

impl OutreachDraftHandler {
    pub fn new(generation: Arc<dyn GenerationService>) -> Self {
        Self { generation }
    }
}

#[async_trait]
impl JobHandler for OutreachDraftHandler {
    fn queue(&self) -> &str {
        OUTREACH_QUEUE
    }

    fn job_name(&self) -> &str {
        OUTREACH_DRAFT_JOB
    }

    async fn execute(&self, ctx: &JobContext, payload: Value) -> Result<JobOutput, HandlerError> {
        let payload: OutreachPayload = parse_payload(payload)?;
        let count = payload.count.unwrap_or(5).clamp(1, MAX_DRAFTS);
        let keywords = run_keywords(ctx);

        let topic = ctx
            .metadata_str("goals")
            .filter(|g| !g.trim().is_empty())
            .map(str::to_string)
            .or_else(|| (!keywords.is_empty()).then(|| keywords.join(", ")))
            .ok_or_else(|| HandlerError::validation("outreach needs campaign goals or keywords"))?;

        let generation = self
            .generation
            .generate(GenerationRequest {
                user_id: ctx.user_id,
                kind: "outreach".to_string(),
                topic,
                options: json!({
                    "audience": payload.audience,
                    "count": count,
                    "keywords": keywords,
                    "business_profile": ctx.metadata("business_profile"),
                }),
            })
            .await?;

        let drafts = match generation.data.get("drafts") {
            Some(Value::Array(drafts)) if !drafts.is_empty() => Value::Array(drafts.clone()),
            _ if !generation.content.trim().is_empty() => json!([generation.content]),
            _ => {
                return Err(HandlerError::external(format!(
                    "generation {} returned no outreach drafts",
                    generation.id
                )))
            }
        };
        let draft_count = drafts.as_array().map(Vec::len).unwrap_or(0);

        Ok(JobOutput::new(json!({
            "generation_id": generation.id,
            "drafts": draft_count,
            "cost": generation.cost,
        }))
        .with_metadata(
            "outreach",
            json!({ "generation_id": generation.id, "drafts": drafts }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{ctx, generation, FakeGeneration};
    use autopilot_core::HandlerErrorKind;

    #[tokio::test]
    async fn test_drafts_from_structured_output() {
        let fake = Arc::new(FakeGeneration::new().respond(Ok(generation(
            "",
            json!({ "drafts": [{"subject": "Hi"}, {"subject": "Hello"}] }),
        ))));
        let handler = OutreachDraftHandler::new(fake.clone());

        let out = handler
            .execute(
                &ctx(json!({ "goals": "wholesale partners", "keywords": ["beans"] })),
                json!({ "audience": {"segment": "cafes"}, "count": 2 }),
            )
            .await
            .unwrap();

        let request = &fake.requests()[0];
        assert_eq!(request.topic, "wholesale partners");
        assert_eq!(request.options["audience"]["segment"], "cafes");
        assert_eq!(out.result["drafts"], 2);
        assert_eq!(out.run_metadata["outreach"]["drafts"][1]["subject"], "Hello");
    }

    #[tokio::test]
    async fn test_plain_content_becomes_single_draft() {
        let fake = FakeGeneration::new().respond(Ok(generation("Dear cafe owner", json!({}))));
        let handler = OutreachDraftHandler::new(Arc::new(fake));

        let out = handler
            .execute(&ctx(json!({ "keywords": ["beans"] })), json!({}))
            .await
            .unwrap();
        assert_eq!(out.run_metadata["outreach"]["drafts"], json!(["Dear cafe owner"]));
    }

    #[tokio::test]
    async fn test_requires_goals_or_keywords() {
        let handler = OutreachDraftHandler::new(Arc::new(FakeGeneration::new()));
        let err = handler
            .execute(&ctx(json!({ "goals": null })), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
    }
}
