// keyword.research: SEO keyword discovery for the campaign topic

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use autopilot_core::queues::{KEYWORD_RESEARCH_JOB, KEYWORD_RESEARCH_QUEUE};
use autopilot_core::{
    GenerationRequest, GenerationService, HandlerError, JobContext, JobHandler, JobOutput,
};

use super::{non_blank, parse_payload, string_list};

const DEFAULT_MAX_KEYWORDS: usize = 20;

#[derive(Debug, Deserialize)]
struct KeywordPayload {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    seed_keywords: Value,
    #[serde(default)]
    max_keywords: Option<usize>,
    #[serde(default)]
    audience: Value,
}

pub struct KeywordResearchHandler {
    generation: Arc<dyn GenerationService>,
}

impl KeywordResearchHandler {
    pub fn new(generation: Arc<dyn GenerationService>) -> Self {
        Self { generation }
    }
}

#[async_trait]
impl JobHandler for KeywordResearchHandler {
    fn queue(&self) -> &str {
        KEYWORD_RESEARCH_QUEUE
    }

    fn job_name(&self) -> &str {
        KEYWORD_RESEARCH_JOB
    }

    async fn execute(&self, ctx: &JobContext, payload: Value) -> Result<JobOutput, HandlerError> {
        let payload: KeywordPayload = parse_payload(payload)?;
        let seeds = string_list(Some(&payload.seed_keywords));
        let max_keywords = payload
            .max_keywords
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_KEYWORDS);

        // Campaigns without goals or an industry can still run off their focus keywords.
        let topic = non_blank(payload.topic)
            .or_else(|| (!seeds.is_empty()).then(|| seeds.join(", ")))
            .ok_or_else(|| HandlerError::validation("keyword research needs a topic"))?;

        let generation = self
            .generation
            .generate(GenerationRequest {
                user_id: ctx.user_id,
                kind: "keywords".to_string(),
                topic: topic.clone(),
                options: json!({
                    "seed_keywords": seeds,
                    "max_keywords": max_keywords,
                    "audience": payload.audience,
                }),
            })
            .await?;

        let mut generated = string_list(generation.data.get("keywords"));
        if generated.is_empty() {
            generated = string_list(Some(&Value::String(generation.content.clone())));
        }

        let keywords = merge_keywords(&seeds, generated, max_keywords);
        if keywords.is_empty() {
            return Err(HandlerError::external(format!(
                "generation {} returned no keywords",
                generation.id
            )));
        }

        info!(count = keywords.len(), topic = %topic, "keyword research finished");

        Ok(JobOutput::new(json!({
            "generation_id": generation.id,
            "topic": topic,
            "keywords": keywords,
            "tokens_used": generation.tokens_used,
            "cost": generation.cost,
        }))
        .with_metadata("keywords", json!(keywords)))
    }
}

/// Seeds first, then generated keywords, deduplicated case-insensitively.
fn merge_keywords(seeds: &[String], generated: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    seeds
        .iter()
        .cloned()
        .chain(generated)
        .filter(|k| seen.insert(k.to_lowercase()))
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{ctx, generation, FakeGeneration};
    use autopilot_core::{CollaboratorError, HandlerErrorKind};

    #[tokio::test]
    async fn test_keywords_added_to_run_metadata() {
        let fake = Arc::new(FakeGeneration::new().respond(Ok(generation(
            "",
            json!({ "keywords": ["Cold brew", "espresso", {"keyword": "latte art"}] }),
        ))));
        let handler = KeywordResearchHandler::new(fake.clone());

        let out = handler
            .execute(
                &ctx(json!({})),
                json!({
                    "topic": "specialty coffee",
                    "seed_keywords": ["cold brew"],
                    "max_keywords": 3,
                }),
            )
            .await
            .unwrap();

        assert_eq!(
            out.run_metadata["keywords"],
            json!(["cold brew", "espresso", "latte art"])
        );
        assert_eq!(out.result["topic"], "specialty coffee");

        let requests = fake.requests();
        assert_eq!(requests[0].kind, "keywords");
        assert_eq!(requests[0].options["max_keywords"], 3);
    }

    #[tokio::test]
    async fn test_falls_back_to_seed_keywords_for_topic() {
        let fake = Arc::new(FakeGeneration::new().respond(Ok(generation(
            "pour over\nfrench press",
            json!({}),
        ))));
        let handler = KeywordResearchHandler::new(fake.clone());

        let out = handler
            .execute(
                &ctx(json!({})),
                json!({ "topic": null, "seed_keywords": ["grinders", "kettles"] }),
            )
            .await
            .unwrap();

        assert_eq!(fake.requests()[0].topic, "grinders, kettles");
        assert_eq!(
            out.run_metadata["keywords"],
            json!(["grinders", "kettles", "pour over", "french press"])
        );
    }

    #[tokio::test]
    async fn test_missing_topic_is_validation_error() {
        let handler = KeywordResearchHandler::new(Arc::new(FakeGeneration::new()));
        let err = handler
            .execute(&ctx(json!({})), json!({ "topic": "  " }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let fake = FakeGeneration::new().respond(Err(CollaboratorError::RateLimited {
            retry_after: None,
            message: "slow down".into(),
        }));
        let handler = KeywordResearchHandler::new(Arc::new(fake));
        let err = handler
            .execute(&ctx(json!({})), json!({ "topic": "coffee" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::RateLimited);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_merge_keywords_caps_and_dedups() {
        let merged = merge_keywords(
            &["A".to_string()],
            vec!["a".into(), "b".into(), "c".into()],
            2,
        );
        assert_eq!(merged, vec!["A", "b"]);
    }
}
