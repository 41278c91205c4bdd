// image.generate: imagery for the generated content

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use autopilot_core::queues::{IMAGE_GENERATE_JOB, IMAGE_GENERATION_QUEUE};
use autopilot_core::{
    GenerationRequest, GenerationService, HandlerError, JobContext, JobHandler, JobOutput,
};

use super::{excerpt, non_blank, parse_payload, run_content, run_keywords};

const PROMPT_CHARS: usize = 500;
const MAX_IMAGES: u32 = 8;

#[derive(Debug, Deserialize)]
struct ImagePayload {
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    count: Option<u32>,
}

pub struct ImageGenerateHandler {
    generation: Arc<dyn GenerationService>,
}

impl ImageGenerateHandler {
    pub fn new(generation: Arc<dyn GenerationService>) -> Self {
        Self { generation }
    }
}

#[async_trait]
impl JobHandler for ImageGenerateHandler {
    fn queue(&self) -> &str {
        IMAGE_GENERATION_QUEUE
    }

    fn job_name(&self) -> &str {
        IMAGE_GENERATE_JOB
    }

    async fn execute(&self, ctx: &JobContext, payload: Value) -> Result<JobOutput, HandlerError> {
        let payload: ImagePayload = parse_payload(payload)?;
        let count = payload.count.unwrap_or(1).clamp(1, MAX_IMAGES);
        let style = non_blank(payload.style).unwrap_or_else(|| "clean editorial".to_string());

        // Launch templates generate imagery straight from keyword research.
        let keywords = run_keywords(ctx);
        let prompt = run_content(ctx)
            .map(|text| excerpt(&text, PROMPT_CHARS))
            .or_else(|| (!keywords.is_empty()).then(|| keywords.join(", ")))
            .ok_or_else(|| HandlerError::validation("no content or keywords to illustrate"))?;

        let generation = self
            .generation
            .generate(GenerationRequest {
                user_id: ctx.user_id,
                kind: "images".to_string(),
                topic: prompt,
                options: json!({ "style": style, "count": count }),
            })
            .await?;

        if generation.images.is_empty() {
            return Err(HandlerError::external(format!(
                "generation {} returned no images",
                generation.id
            )));
        }

        Ok(JobOutput::new(json!({
            "generation_id": generation.id,
            "images": generation.images,
            "style": style,
            "cost": generation.cost,
        }))
        .with_metadata("images", json!(generation.images)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{ctx, generation, FakeGeneration};
    use autopilot_core::HandlerErrorKind;

    fn with_images(urls: &[&str]) -> autopilot_core::Generation {
        let mut g = generation("", json!({}));
        g.images = urls.iter().map(|u| u.to_string()).collect();
        g
    }

    #[tokio::test]
    async fn test_images_added_to_metadata() {
        let fake = Arc::new(
            FakeGeneration::new().respond(Ok(with_images(&["https://cdn/x.png", "https://cdn/y.png"]))),
        );
        let handler = ImageGenerateHandler::new(fake.clone());

        let out = handler
            .execute(
                &ctx(json!({ "content": { "text": "A guide to cold brew" } })),
                json!({ "style": "bold launch", "count": 20 }),
            )
            .await
            .unwrap();

        let request = &fake.requests()[0];
        assert_eq!(request.topic, "A guide to cold brew");
        assert_eq!(request.options["count"], MAX_IMAGES);
        assert_eq!(
            out.run_metadata["images"],
            json!(["https://cdn/x.png", "https://cdn/y.png"])
        );
    }

    #[tokio::test]
    async fn test_prompt_from_keywords_without_content() {
        let fake = Arc::new(FakeGeneration::new().respond(Ok(with_images(&["https://cdn/z.png"]))));
        let handler = ImageGenerateHandler::new(fake.clone());

        handler
            .execute(&ctx(json!({ "keywords": ["launch", "coffee"] })), json!({}))
            .await
            .unwrap();
        assert_eq!(fake.requests()[0].topic, "launch, coffee");
    }

    #[tokio::test]
    async fn test_no_images_is_external_failure() {
        let handler = ImageGenerateHandler::new(Arc::new(FakeGeneration::new()));
        let err = handler
            .execute(&ctx(json!({ "keywords": ["x"] })), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::External);
    }

    #[tokio::test]
    async fn test_nothing_to_illustrate() {
        let handler = ImageGenerateHandler::new(Arc::new(FakeGeneration::new()));
        let err = handler.execute(&ctx(json!({})), json!({})).await.unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
    }
}
