// Social handlers: drafting, calendar preparation and publishing
//
// social.draft creates one draft post per platform. social.prepare-calendar
// hands those drafts to the engine's fan-out scheduler, which creates one
// social.publish job per connected account. social.publish posts through the
// platform gateway with the account's own token.
// Decision: A draft job succeeds if at least one platform got a draft; retrying
// it would duplicate the drafts that were already created

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use autopilot_core::queues::{
    SOCIAL_CALENDAR_JOB, SOCIAL_DRAFT_JOB, SOCIAL_PUBLISH_JOB, SOCIAL_QUEUE,
};
use autopilot_core::{
    GenerationRequest, GenerationService, HandlerError, HandlerErrorKind, JobContext, JobHandler,
    JobOutput, NewSocialPost, PublishRequest, PublishTarget, SocialDirectory, SocialPublisher,
};

use super::{excerpt, parse_payload, run_content, run_keywords, string_list};

const SOURCE_CHARS: usize = 2000;

// ============================================================================
// social.draft
// ============================================================================

#[derive(Debug, Deserialize)]
struct DraftPayload {
    #[serde(default)]
    platforms: Vec<String>,
}

pub struct SocialDraftHandler {
    generation: Arc<dyn GenerationService>,
    directory: Arc<dyn SocialDirectory>,
}

impl SocialDraftHandler {
    pub fn new(generation: Arc<dyn GenerationService>, directory: Arc<dyn SocialDirectory>) -> Self {
        Self {
            generation,
            directory,
        }
    }

    async fn draft_for(
        &self,
        ctx: &JobContext,
        platform: &str,
        source: &str,
        keywords: &[String],
        media: &[String],
    ) -> Result<PublishTarget, HandlerError> {
        let generation = self
            .generation
            .generate(GenerationRequest {
                user_id: ctx.user_id,
                kind: "social_post".to_string(),
                topic: source.to_string(),
                options: json!({ "platform": platform, "keywords": keywords }),
            })
            .await?;

        if generation.content.trim().is_empty() {
            return Err(HandlerError::external(format!(
                "generation {} returned an empty {} post",
                generation.id, platform
            )));
        }

        let post = self
            .directory
            .create_draft_post(NewSocialPost {
                user_id: ctx.user_id,
                campaign_id: Some(ctx.campaign_id),
                platform: platform.to_string(),
                content: generation.content,
                media: media.to_vec(),
            })
            .await?;

        Ok(PublishTarget {
            platform: platform.to_string(),
            post_id: post.id,
        })
    }
}

#[async_trait]
impl JobHandler for SocialDraftHandler {
    fn queue(&self) -> &str {
        SOCIAL_QUEUE
    }

    fn job_name(&self) -> &str {
        SOCIAL_DRAFT_JOB
    }

    async fn execute(&self, ctx: &JobContext, payload: Value) -> Result<JobOutput, HandlerError> {
        let payload: DraftPayload = parse_payload(payload)?;
        let mut platforms: Vec<String> = Vec::new();
        for p in payload.platforms.iter().map(|p| p.trim().to_lowercase()) {
            if !p.is_empty() && !platforms.contains(&p) {
                platforms.push(p);
            }
        }
        if platforms.is_empty() {
            return Err(HandlerError::validation("no platforms to draft for"));
        }

        let keywords = run_keywords(ctx);
        let source = run_content(ctx)
            .map(|text| excerpt(&text, SOURCE_CHARS))
            .or_else(|| (!keywords.is_empty()).then(|| keywords.join(", ")))
            .ok_or_else(|| HandlerError::validation("no content or keywords to draft from"))?;
        let media = string_list(ctx.metadata("images"));

        let mut drafts = Vec::new();
        let mut failures = Vec::new();
        for platform in &platforms {
            match self
                .draft_for(ctx, platform, &source, &keywords, &media)
                .await
            {
                Ok(target) => drafts.push(target),
                Err(e) => {
                    warn!(platform = %platform, error = %e, "social draft failed");
                    failures.push((platform.clone(), e));
                }
            }
        }

        if drafts.is_empty() {
            // Nothing was created, so the whole job can be retried safely.
            return Err(match failures.into_iter().next() {
                Some((platform, first)) => HandlerError::new(
                    first.kind,
                    format!("no social drafts created ({} failed first)", platform),
                )
                .with_source(first),
                None => HandlerError::internal("no social drafts created"),
            });
        }

        let failed: Vec<Value> = failures
            .iter()
            .map(|(platform, e)| json!({ "platform": platform, "error": e.to_string() }))
            .collect();
        info!(drafts = drafts.len(), failed = failed.len(), "social drafts created");

        Ok(JobOutput::new(json!({
            "drafts": drafts,
            "failed_platforms": failed,
        }))
        .with_metadata("social_drafts", json!(drafts)))
    }
}

// ============================================================================
// social.prepare-calendar
// ============================================================================

/// Turns the run's drafts into publish targets for the fan-out scheduler.
pub struct SocialCalendarHandler;

#[async_trait]
impl JobHandler for SocialCalendarHandler {
    fn queue(&self) -> &str {
        SOCIAL_QUEUE
    }

    fn job_name(&self) -> &str {
        SOCIAL_CALENDAR_JOB
    }

    async fn execute(&self, ctx: &JobContext, _payload: Value) -> Result<JobOutput, HandlerError> {
        let drafts = ctx
            .metadata("social_drafts")
            .cloned()
            .ok_or_else(|| HandlerError::validation("run has no social drafts to schedule"))?;
        let targets: Vec<PublishTarget> = serde_json::from_value(drafts).map_err(|e| {
            HandlerError::validation(format!("malformed social drafts: {}", e)).with_source(e)
        })?;

        let platforms: Vec<&str> = targets.iter().map(|t| t.platform.as_str()).collect();
        let result = json!({ "posts": targets.len(), "platforms": platforms });
        Ok(JobOutput::new(result).with_publish_targets(targets))
    }
}

// ============================================================================
// social.publish
// ============================================================================

#[derive(Debug, Deserialize)]
struct PublishPayload {
    post_id: Uuid,
    platform: String,
    account_id: String,
}

pub struct SocialPublishHandler {
    publisher: Arc<dyn SocialPublisher>,
    directory: Arc<dyn SocialDirectory>,
}

impl SocialPublishHandler {
    pub fn new(publisher: Arc<dyn SocialPublisher>, directory: Arc<dyn SocialDirectory>) -> Self {
        Self {
            publisher,
            directory,
        }
    }
}

#[async_trait]
impl JobHandler for SocialPublishHandler {
    fn queue(&self) -> &str {
        SOCIAL_QUEUE
    }

    fn job_name(&self) -> &str {
        SOCIAL_PUBLISH_JOB
    }

    async fn execute(&self, ctx: &JobContext, payload: Value) -> Result<JobOutput, HandlerError> {
        let payload: PublishPayload = parse_payload(payload)?;

        let post = self
            .directory
            .get_post(payload.post_id)
            .await?
            .ok_or_else(|| {
                HandlerError::validation(format!("social post {} not found", payload.post_id))
            })?;

        let account = self
            .directory
            .get_account(ctx.user_id, &payload.platform, &payload.account_id)
            .await?
            .ok_or_else(|| {
                HandlerError::validation(format!(
                    "{} account {} is not connected",
                    payload.platform, payload.account_id
                ))
            })?;
        if !account.is_active {
            return Err(HandlerError::new(
                HandlerErrorKind::Unauthorized,
                format!("{} account {} is disconnected", account.platform, account.account_id),
            ));
        }

        let receipt = self
            .publisher
            .publish(
                &payload.platform,
                &account.access_token,
                &account.account_id,
                PublishRequest {
                    text: post.content.clone(),
                    media: post.media.clone(),
                    scheduled_at: None,
                },
            )
            .await?;

        self.directory
            .mark_post_published(post.id, &receipt.platform_post_id)
            .await?;
        info!(
            post_id = %post.id,
            platform = %payload.platform,
            platform_post_id = %receipt.platform_post_id,
            "post published"
        );

        Ok(JobOutput::new(json!({
            "post_id": post.id,
            "platform": payload.platform,
            "account_id": account.account_id,
            "platform_post_id": receipt.platform_post_id,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{ctx, generation, FakeGeneration, FakePublisher};
    use autopilot_core::memory::InMemorySocialDirectory;
    use autopilot_core::{CollaboratorError, SocialPostStatus};

    #[tokio::test]
    async fn test_draft_one_post_per_platform() {
        let directory = InMemorySocialDirectory::new();
        let fake = Arc::new(FakeGeneration::new());
        let handler = SocialDraftHandler::new(fake.clone(), Arc::new(directory.clone()));
        let ctx = ctx(json!({
            "content": { "text": "Cold brew guide" },
            "images": ["https://cdn/a.png"],
        }));

        let out = handler
            .execute(&ctx, json!({ "platforms": ["twitter", "LinkedIn", "twitter"] }))
            .await
            .unwrap();

        let drafts: Vec<PublishTarget> =
            serde_json::from_value(out.run_metadata["social_drafts"].clone()).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].platform, "linkedin");

        let post = directory.post(drafts[0].post_id).unwrap();
        assert_eq!(post.status, SocialPostStatus::Draft);
        assert_eq!(post.campaign_id, Some(ctx.campaign_id));
        assert_eq!(post.media, vec!["https://cdn/a.png"]);

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].options["platform"], "twitter");
        assert_eq!(requests[0].topic, "Cold brew guide");
    }

    #[tokio::test]
    async fn test_draft_partial_failure_keeps_created_drafts() {
        let fake = FakeGeneration::new()
            .respond(Err(CollaboratorError::Upstream("502".into())))
            .respond(Ok(generation("Fresh beans!", json!({}))));
        let handler = SocialDraftHandler::new(
            Arc::new(fake),
            Arc::new(InMemorySocialDirectory::new()),
        );

        let out = handler
            .execute(
                &ctx(json!({ "keywords": ["beans"] })),
                json!({ "platforms": ["twitter", "facebook"] }),
            )
            .await
            .unwrap();

        assert_eq!(out.result["drafts"].as_array().unwrap().len(), 1);
        assert_eq!(out.result["failed_platforms"][0]["platform"], "twitter");
    }

    #[tokio::test]
    async fn test_draft_all_failed_keeps_error_kind() {
        let fake = FakeGeneration::new().respond(Err(CollaboratorError::RateLimited {
            retry_after: None,
            message: "quota".into(),
        }));
        let handler = SocialDraftHandler::new(
            Arc::new(fake),
            Arc::new(InMemorySocialDirectory::new()),
        );

        let err = handler
            .execute(
                &ctx(json!({ "keywords": ["beans"] })),
                json!({ "platforms": ["twitter"] }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::RateLimited);
        assert!(err.chain().len() >= 2);
    }

    #[tokio::test]
    async fn test_draft_requires_platforms() {
        let handler = SocialDraftHandler::new(
            Arc::new(FakeGeneration::new()),
            Arc::new(InMemorySocialDirectory::new()),
        );
        let err = handler
            .execute(&ctx(json!({ "keywords": ["x"] })), json!({ "platforms": [] }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_calendar_returns_publish_targets() {
        let post_id = Uuid::now_v7();
        let ctx = ctx(json!({
            "social_drafts": [{ "platform": "twitter", "post_id": post_id }]
        }));

        let out = SocialCalendarHandler.execute(&ctx, json!({})).await.unwrap();
        assert_eq!(
            out.publish_targets,
            vec![PublishTarget {
                platform: "twitter".into(),
                post_id
            }]
        );
        assert_eq!(out.result["posts"], 1);
    }

    #[tokio::test]
    async fn test_calendar_without_drafts_fails_validation() {
        let err = SocialCalendarHandler
            .execute(&ctx(json!({})), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
    }

    async fn draft(directory: &InMemorySocialDirectory, user_id: Uuid) -> Uuid {
        directory
            .create_draft_post(NewSocialPost {
                user_id,
                campaign_id: None,
                platform: "twitter".into(),
                content: "Spring menu is live".into(),
                media: vec![],
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_publish_uses_account_token_and_marks_post() {
        let directory = InMemorySocialDirectory::new();
        let publisher = Arc::new(FakePublisher::default());
        let handler = SocialPublishHandler::new(publisher.clone(), Arc::new(directory.clone()));
        let ctx = ctx(json!({}));
        let account = directory.add_account(ctx.user_id, "twitter", "acct-1");
        let post_id = draft(&directory, ctx.user_id).await;

        let out = handler
            .execute(
                &ctx,
                json!({ "post_id": post_id, "platform": "twitter", "account_id": "acct-1" }),
            )
            .await
            .unwrap();

        let published = publisher.published.lock().unwrap();
        assert_eq!(published[0].1, account.access_token);
        assert_eq!(published[0].3.text, "Spring menu is live");
        assert_eq!(out.result["platform_post_id"], "twitter-acct-1");

        let post = directory.post(post_id).unwrap();
        assert_eq!(post.status, SocialPostStatus::Published);
        assert_eq!(post.platform_post_id.as_deref(), Some("twitter-acct-1"));
    }

    #[tokio::test]
    async fn test_publish_missing_account_is_validation() {
        let directory = InMemorySocialDirectory::new();
        let handler = SocialPublishHandler::new(
            Arc::new(FakePublisher::default()),
            Arc::new(directory.clone()),
        );
        let ctx = ctx(json!({}));
        let post_id = draft(&directory, ctx.user_id).await;

        let err = handler
            .execute(
                &ctx,
                json!({ "post_id": post_id, "platform": "twitter", "account_id": "gone" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_publish_revoked_token_is_unauthorized() {
        let directory = InMemorySocialDirectory::new();
        let publisher = Arc::new(FakePublisher::default());
        *publisher.fail_with.lock().unwrap() =
            Some(CollaboratorError::Unauthorized("token revoked".into()));
        let handler = SocialPublishHandler::new(publisher, Arc::new(directory.clone()));
        let ctx = ctx(json!({}));
        directory.add_account(ctx.user_id, "twitter", "acct-1");
        let post_id = draft(&directory, ctx.user_id).await;

        let err = handler
            .execute(
                &ctx,
                json!({ "post_id": post_id, "platform": "twitter", "account_id": "acct-1" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Unauthorized);
        assert_eq!(
            directory.post(post_id).unwrap().status,
            SocialPostStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_publish_bad_payload() {
        let handler = SocialPublishHandler::new(
            Arc::new(FakePublisher::default()),
            Arc::new(InMemorySocialDirectory::new()),
        );
        let err = handler
            .execute(&ctx(json!({})), json!({ "platform": "twitter" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::Validation);
    }
}
