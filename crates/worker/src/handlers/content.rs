// content.generate: long-form content built around the researched keywords

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use autopilot_core::queues::{CONTENT_GENERATE_JOB, CONTENT_GENERATION_QUEUE};
use autopilot_core::{
    GenerationRequest, GenerationService, HandlerError, JobContext, JobHandler, JobOutput,
};

use super::{non_blank, parse_payload, run_keywords};

#[derive(Debug, Deserialize)]
struct ContentPayload {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    tone: Option<String>,
}

pub struct ContentGenerateHandler {
    generation: Arc<dyn GenerationService>,
}

impl ContentGenerateHandler {
    pub fn new(generation: Arc<dyn GenerationService>) -> Self {
        Self { generation }
    }
}

#[async_trait]
impl JobHandler for ContentGenerateHandler {
    fn queue(&self) -> &str {
        CONTENT_GENERATION_QUEUE
    }

    fn job_name(&self) -> &str {
        CONTENT_GENERATE_JOB
    }

    async fn execute(&self, ctx: &JobContext, payload: Value) -> Result<JobOutput, HandlerError> {
        let payload: ContentPayload = parse_payload(payload)?;
        let keywords = run_keywords(ctx);

        let topic = non_blank(payload.topic)
            .or_else(|| keywords.first().cloned())
            .ok_or_else(|| HandlerError::validation("content generation needs a topic or keywords"))?;
        let format = non_blank(payload.format).unwrap_or_else(|| "blog_post".to_string());
        let tone = non_blank(payload.tone).unwrap_or_else(|| "professional".to_string());

        let generation = self
            .generation
            .generate(GenerationRequest {
                user_id: ctx.user_id,
                kind: "content".to_string(),
                topic: topic.clone(),
                options: json!({
                    "format": format,
                    "tone": tone,
                    "keywords": keywords,
                }),
            })
            .await?;

        if generation.content.trim().is_empty() {
            return Err(HandlerError::external(format!(
                "generation {} returned empty content",
                generation.id
            )));
        }

        let title = generation
            .data
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| topic.clone());
        let word_count = generation.content.split_whitespace().count();
        info!(word_count, format = %format, "content generated");

        Ok(JobOutput::new(json!({
            "generation_id": generation.id,
            "title": title,
            "format": format,
            "word_count": word_count,
            "tokens_used": generation.tokens_used,
            "cost": generation.cost,
        }))
        .with_metadata(
            "content",
            json!({
                "generation_id": generation.id,
                "title": title,
                "format": format,
                "text": generation.content,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{ctx, generation, FakeGeneration};
    use autopilot_core::HandlerErrorKind;

    #[tokio::test]
    async fn test_uses_run_keywords() {
        let fake = Arc::new(FakeGeneration::new().respond(Ok(generation(
            "Cold brew is steeped for twelve hours.",
            json!({ "title": "The cold brew guide" }),
        ))));
        let handler = ContentGenerateHandler::new(fake.clone());

        let out = handler
            .execute(
                &ctx(json!({ "keywords": ["cold brew", "steeping"] })),
                json!({ "topic": "coffee at home", "format": "blog_post", "tone": "friendly" }),
            )
            .await
            .unwrap();

        let request = &fake.requests()[0];
        assert_eq!(request.kind, "content");
        assert_eq!(request.options["keywords"], json!(["cold brew", "steeping"]));
        assert_eq!(request.options["tone"], "friendly");

        assert_eq!(out.result["word_count"], 7);
        assert_eq!(out.run_metadata["content"]["title"], "The cold brew guide");
        assert_eq!(
            out.run_metadata["content"]["text"],
            "Cold brew is steeped for twelve hours."
        );
    }

    #[tokio::test]
    async fn test_topic_falls_back_to_first_keyword() {
        let fake = Arc::new(FakeGeneration::new());
        let handler = ContentGenerateHandler::new(fake.clone());

        let out = handler
            .execute(&ctx(json!({ "keywords": ["latte art"] })), json!({}))
            .await
            .unwrap();

        assert_eq!(fake.requests()[0].topic, "latte art");
        assert_eq!(out.result["format"], "blog_post");
    }

    #[tokio::test]
    async fn test_empty_content_is_external_failure() {
        let fake = FakeGeneration::new().respond(Ok(generation("   ", json!({}))));
        let handler = ContentGenerateHandler::new(Arc::new(fake));
        let err = handler
            .execute(&ctx(json!({})), json!({ "topic": "tea" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::External);
    }

    #[tokio::test]
    async fn test_no_topic_and_no_keywords() {
        let handler = ContentGenerateHandler::new(Arc::new(FakeGeneration::new()));
        let err = handler
            .execute(&ctx(json!({})), json!({ "topic": null }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
    }
}
