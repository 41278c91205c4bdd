// Job handlers
//
// One handler per (queue, job name) pair used by the built-in templates. Each
// reads its step payload and the run metadata accumulated by earlier steps,
// calls a collaborator and returns a JobOutput. The engine persists the
// result, merges metadata and schedules follow-up jobs.
//
// Metadata flow between steps:
//   keyword.research       -> keywords
//   content.generate       -> content
//   image.generate         -> images
//   outreach.draft         -> outreach
//   analytics.setup        -> analytics
//   social.draft           -> social_drafts [{platform, post_id}]
//   social.prepare-calendar reads social_drafts and returns publish targets

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use autopilot_core::{
    AnalyticsService, GenerationService, HandlerError, HandlerRegistry, JobContext,
    SocialDirectory, SocialPublisher,
};

mod analytics;
mod content;
mod image;
mod keyword;
mod outreach;
mod social;

pub use analytics::AnalyticsSetupHandler;
pub use content::ContentGenerateHandler;
pub use image::ImageGenerateHandler;
pub use keyword::KeywordResearchHandler;
pub use outreach::OutreachDraftHandler;
pub use social::{SocialCalendarHandler, SocialDraftHandler, SocialPublishHandler};

/// Collaborators the handlers call.
#[derive(Clone)]
pub struct HandlerDeps {
    pub generation: Arc<dyn GenerationService>,
    pub publisher: Arc<dyn SocialPublisher>,
    pub analytics: Arc<dyn AnalyticsService>,
    pub directory: Arc<dyn SocialDirectory>,
}

/// Registry with every built-in handler.
pub fn registry(deps: &HandlerDeps) -> HandlerRegistry {
    HandlerRegistry::builder()
        .handler(KeywordResearchHandler::new(deps.generation.clone()))
        .handler(ContentGenerateHandler::new(deps.generation.clone()))
        .handler(ImageGenerateHandler::new(deps.generation.clone()))
        .handler(OutreachDraftHandler::new(deps.generation.clone()))
        .handler(AnalyticsSetupHandler::new(deps.analytics.clone()))
        .handler(SocialDraftHandler::new(
            deps.generation.clone(),
            deps.directory.clone(),
        ))
        .handler(SocialCalendarHandler)
        .handler(SocialPublishHandler::new(
            deps.publisher.clone(),
            deps.directory.clone(),
        ))
        .build()
}

/// Deserialize a step payload, rejecting malformed input as a validation error.
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, HandlerError> {
    serde_json::from_value(payload)
        .map_err(|e| HandlerError::validation(format!("invalid payload: {}", e)).with_source(e))
}

/// Keywords collected by keyword research, if any.
pub(crate) fn run_keywords(ctx: &JobContext) -> Vec<String> {
    string_list(ctx.metadata("keywords"))
}

/// Text produced by content generation, if any.
pub(crate) fn run_content(ctx: &JobContext) -> Option<String> {
    ctx.metadata("content")
        .and_then(|c| c.get("text"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Strings from a JSON array, or from a comma/newline separated string.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o
                    .get("keyword")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split([',', '\n']).map(str::to_string).collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// First `max_chars` characters of `text`, cut at a character boundary.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// A non-blank string option.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Collaborator doubles shared by handler tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use autopilot_core::{
        CollaboratorError, CollaboratorResult, Generation, GenerationRequest, GenerationService,
        JobContext, PublishReceipt, PublishRequest, SocialPublisher,
    };

    pub fn ctx(run_metadata: serde_json::Value) -> JobContext {
        JobContext {
            run_id: Uuid::now_v7(),
            job_id: Uuid::now_v7(),
            step_id: "step".into(),
            user_id: Uuid::now_v7(),
            campaign_id: Uuid::now_v7(),
            attempt: 1,
            run_metadata,
        }
    }

    /// Returns queued responses in order, then a default generation.
    #[derive(Default)]
    pub struct FakeGeneration {
        pub requests: Mutex<Vec<GenerationRequest>>,
        responses: Mutex<VecDeque<CollaboratorResult<Generation>>>,
    }

    impl FakeGeneration {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, response: CollaboratorResult<Generation>) -> Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        pub fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    pub fn generation(content: &str, data: serde_json::Value) -> Generation {
        Generation {
            id: format!("gen-{}", Uuid::now_v7()),
            content: content.to_string(),
            images: vec![],
            tokens_used: 100,
            cost: 0.002,
            data,
        }
    }

    #[async_trait]
    impl GenerationService for FakeGeneration {
        async fn generate(&self, request: GenerationRequest) -> CollaboratorResult<Generation> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Ok(generation(
                    &format!("{} about {}", request.kind, request.topic),
                    json!({}),
                ))
            })
        }
    }

    #[derive(Default)]
    pub struct FakePublisher {
        pub published: Mutex<Vec<(String, String, String, PublishRequest)>>,
        pub fail_with: Mutex<Option<CollaboratorError>>,
    }

    #[async_trait]
    impl SocialPublisher for FakePublisher {
        async fn publish(
            &self,
            platform: &str,
            access_token: &str,
            account_id: &str,
            request: PublishRequest,
        ) -> CollaboratorResult<PublishReceipt> {
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            self.published.lock().unwrap().push((
                platform.to_string(),
                access_token.to_string(),
                account_id.to_string(),
                request,
            ));
            Ok(PublishReceipt {
                platform_post_id: format!("{}-{}", platform, account_id),
            })
        }
    }
}
