// HTTP clients for external collaborators
//
// Generation, publishing, scheduling advice and analytics are separate
// services reached over JSON/HTTP. All of them share ApiClient, which turns
// HTTP status codes into CollaboratorError variants so handlers can classify
// failures without looking at response bodies.
// Decision: 429 and 5xx are retryable upstream conditions, other 4xx are not

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use autopilot_core::{
    AnalyticsService, CollaboratorError, CollaboratorResult, Generation, GenerationRequest,
    GenerationService, LogNotifier, Notifier, PostingAdvice, PublishReceipt, PublishRequest,
    SchedulingAdvisor, SocialPublisher, TrackingSetup, WorkflowNotification,
};

use crate::config::CollaboratorConfig;

/// JSON client for one collaborator base URL.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> CollaboratorResult<T> {
        let request = self.http.get(self.url(path)).query(query);
        let response = self.authorize(request).send().await.map_err(transport)?;
        self.handle_response(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> CollaboratorResult<T> {
        let request = self.http.post(self.url(path)).json(body);
        let response = self.authorize(request).send().await.map_err(transport)?;
        self.handle_response(response).await
    }

    /// POST where the response body is ignored.
    pub async fn send<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> CollaboratorResult<()> {
        let request = self.http.post(self.url(path)).json(body);
        let response = self.authorize(request).send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(error_from_response(response).await)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> CollaboratorResult<T> {
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::Upstream(format!("invalid response body: {}", e)))
    }
}

async fn error_from_response(response: reqwest::Response) -> CollaboratorError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    classify_status(status, retry_after, body)
}

/// Map a non-success status to a collaborator error.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
) -> CollaboratorError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => CollaboratorError::RateLimited {
            retry_after,
            message,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollaboratorError::Unauthorized(message),
        StatusCode::NOT_FOUND => CollaboratorError::NotFound(message),
        s if s.is_client_error() => CollaboratorError::Invalid(message),
        _ => CollaboratorError::Upstream(message),
    }
}

fn transport(e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Upstream(format!("request timed out: {}", e))
    } else {
        CollaboratorError::Upstream(format!("request failed: {}", e))
    }
}

// ============================================================================
// Collaborator implementations
// ============================================================================

/// Content generation service: keywords, long-form content, images, drafts.
#[derive(Clone)]
pub struct HttpGenerationService {
    client: ApiClient,
}

impl HttpGenerationService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, request: GenerationRequest) -> CollaboratorResult<Generation> {
        debug!(kind = %request.kind, user_id = %request.user_id, "requesting generation");
        self.client.post("/v1/generations", &request).await
    }
}

/// Social platform gateway.
#[derive(Clone)]
pub struct HttpSocialPublisher {
    client: ApiClient,
}

impl HttpSocialPublisher {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SocialPublisher for HttpSocialPublisher {
    async fn publish(
        &self,
        platform: &str,
        access_token: &str,
        account_id: &str,
        request: PublishRequest,
    ) -> CollaboratorResult<PublishReceipt> {
        let body = json!({
            "account_id": account_id,
            "access_token": access_token,
            "text": request.text,
            "media": request.media,
            "scheduled_at": request.scheduled_at,
        });
        self.client
            .post(&format!("/v1/platforms/{}/posts", platform), &body)
            .await
    }
}

/// Optimal posting time recommendations.
#[derive(Clone)]
pub struct HttpSchedulingAdvisor {
    client: ApiClient,
}

impl HttpSchedulingAdvisor {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchedulingAdvisor for HttpSchedulingAdvisor {
    async fn optimal_posting_time(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> CollaboratorResult<PostingAdvice> {
        let user_id = user_id.to_string();
        self.client
            .get(
                "/v1/scheduling/optimal-time",
                &[("user_id", user_id.as_str()), ("platform", platform)],
            )
            .await
    }
}

#[derive(Clone)]
pub struct HttpAnalyticsService {
    client: ApiClient,
}

impl HttpAnalyticsService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnalyticsService for HttpAnalyticsService {
    async fn setup_tracking(
        &self,
        user_id: Uuid,
        campaign_id: Uuid,
        goals: Vec<String>,
    ) -> CollaboratorResult<TrackingSetup> {
        let body = json!({ "user_id": user_id, "goals": goals });
        self.client
            .post(&format!("/v1/campaigns/{}/tracking", campaign_id), &body)
            .await
    }
}

/// Posts every notification as JSON to a webhook URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: ApiClient,
}

impl WebhookNotifier {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: WorkflowNotification) -> CollaboratorResult<()> {
        self.client.send("", &notification).await
    }
}

/// The external services a worker talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub generation: Arc<dyn GenerationService>,
    pub publisher: Arc<dyn SocialPublisher>,
    pub advisor: Arc<dyn SchedulingAdvisor>,
    pub analytics: Arc<dyn AnalyticsService>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// HTTP clients for every collaborator, built from one config.
    pub fn http(config: &CollaboratorConfig) -> Self {
        let client =
            |url: &str| ApiClient::new(url, config.api_token.clone(), config.request_timeout);

        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(client(url))),
            None => Arc::new(LogNotifier),
        };

        Self {
            generation: Arc::new(HttpGenerationService::new(client(&config.generation_url))),
            publisher: Arc::new(HttpSocialPublisher::new(client(&config.social_url))),
            advisor: Arc::new(HttpSchedulingAdvisor::new(client(&config.scheduling_url))),
            analytics: Arc::new(HttpAnalyticsService::new(client(&config.analytics_url))),
            notifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{NotificationKind, Severity};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(
            &server.uri(),
            Some("svc-token".to_string()),
            Duration::from_secs(5),
        )
    }

    fn generation_request() -> GenerationRequest {
        GenerationRequest {
            user_id: Uuid::now_v7(),
            kind: "keywords".to_string(),
            topic: "coffee".to_string(),
            options: json!({ "max_keywords": 5 }),
        }
    }

    #[tokio::test]
    async fn test_generation_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generations"))
            .and(header("authorization", "Bearer svc-token"))
            .and(body_partial_json(json!({ "kind": "keywords", "topic": "coffee" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-1",
                "content": "",
                "tokens_used": 120,
                "cost": 0.01,
                "data": { "keywords": ["espresso", "latte"] }
            })))
            .mount(&server)
            .await;

        let service = HttpGenerationService::new(client(&server));
        let generation = service.generate(generation_request()).await.unwrap();
        assert_eq!(generation.id, "gen-1");
        assert_eq!(generation.tokens_used, 120);
        assert!(generation.images.is_empty());
        assert_eq!(generation.data["keywords"][1], "latte");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generations"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("quota exceeded"),
            )
            .mount(&server)
            .await;

        let service = HttpGenerationService::new(client(&server));
        match service.generate(generation_request()).await {
            Err(CollaboratorError::RateLimited {
                retry_after,
                message,
            }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, String::new()),
            CollaboratorError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, String::new()),
            CollaboratorError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, String::new()),
            CollaboratorError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, None, "bad topic".into()),
            CollaboratorError::Invalid(m) if m.contains("bad topic")
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, String::new()),
            CollaboratorError::Upstream(_)
        ));
    }

    #[tokio::test]
    async fn test_publish_sends_account_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/platforms/twitter/posts"))
            .and(body_partial_json(json!({
                "account_id": "acct-1",
                "access_token": "user-token",
                "text": "hello"
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "platform_post_id": "tw-9" })),
            )
            .mount(&server)
            .await;

        let publisher = HttpSocialPublisher::new(client(&server));
        let receipt = publisher
            .publish(
                "twitter",
                "user-token",
                "acct-1",
                PublishRequest {
                    text: "hello".into(),
                    media: vec![],
                    scheduled_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.platform_post_id, "tw-9");
    }

    #[tokio::test]
    async fn test_publish_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/platforms/linkedin/posts"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
            .mount(&server)
            .await;

        let publisher = HttpSocialPublisher::new(client(&server));
        let err = publisher
            .publish(
                "linkedin",
                "stale",
                "acct-2",
                PublishRequest {
                    text: "hi".into(),
                    media: vec![],
                    scheduled_at: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_scheduling_advice_query() {
        let server = MockServer::start().await;
        let user_id = Uuid::now_v7();
        Mock::given(method("GET"))
            .and(path("/v1/scheduling/optimal-time"))
            .and(query_param("platform", "instagram"))
            .and(query_param("user_id", user_id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "datetime": "2026-03-01T14:00:00Z",
                "reasoning": "weekend afternoons"
            })))
            .mount(&server)
            .await;

        let advisor = HttpSchedulingAdvisor::new(client(&server));
        let advice = advisor
            .optimal_posting_time(user_id, "instagram")
            .await
            .unwrap();
        assert_eq!(advice.datetime.to_rfc3339(), "2026-03-01T14:00:00+00:00");
        assert_eq!(advice.reasoning, "weekend afternoons");
    }

    #[tokio::test]
    async fn test_analytics_server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let analytics = HttpAnalyticsService::new(client(&server));
        let err = analytics
            .setup_tracking(Uuid::now_v7(), Uuid::now_v7(), vec!["signups".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_upstream() {
        // Nothing listens on port 9 locally.
        let client = ApiClient::new("http://127.0.0.1:9", None, Duration::from_secs(2));
        let service = HttpGenerationService::new(client);
        let err = service.generate(generation_request()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_webhook_notifier_posts_notification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/workflows"))
            .and(body_partial_json(json!({
                "kind": "failure",
                "severity": "critical",
                "error_kind": "unauthorized"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(ApiClient::new(
            &format!("{}/hooks/workflows", server.uri()),
            None,
            Duration::from_secs(5),
        ));
        notifier
            .notify(WorkflowNotification {
                kind: NotificationKind::Failure,
                run_id: Uuid::now_v7(),
                job_id: Some(Uuid::now_v7()),
                campaign_name: Some("Spring launch".into()),
                user_email: None,
                message: "publish failed".into(),
                severity: Severity::Critical,
                error_kind: Some("unauthorized".into()),
            })
            .await
            .unwrap();
    }
}
