// Queue and job names shared by templates, handlers and workers

pub const KEYWORD_RESEARCH_QUEUE: &str = "keyword-research";
pub const CONTENT_GENERATION_QUEUE: &str = "content-generation";
pub const IMAGE_GENERATION_QUEUE: &str = "image-generation";
pub const OUTREACH_QUEUE: &str = "outreach";
pub const ANALYTICS_QUEUE: &str = "analytics";
pub const SOCIAL_QUEUE: &str = "social";

pub const KEYWORD_RESEARCH_JOB: &str = "keyword.research";
pub const CONTENT_GENERATE_JOB: &str = "content.generate";
pub const IMAGE_GENERATE_JOB: &str = "image.generate";
pub const OUTREACH_DRAFT_JOB: &str = "outreach.draft";
pub const ANALYTICS_SETUP_JOB: &str = "analytics.setup";
pub const SOCIAL_DRAFT_JOB: &str = "social.draft";
pub const SOCIAL_CALENDAR_JOB: &str = "social.prepare-calendar";
pub const SOCIAL_PUBLISH_JOB: &str = "social.publish";

/// Worker concurrency for a queue. Generation queues are kept low to respect
/// upstream rate limits; publishing is mostly waiting on platform APIs.
pub fn default_concurrency(queue: &str) -> usize {
    match queue {
        CONTENT_GENERATION_QUEUE => 2,
        SOCIAL_QUEUE => 8,
        KEYWORD_RESEARCH_QUEUE | IMAGE_GENERATION_QUEUE | OUTREACH_QUEUE | ANALYTICS_QUEUE => 1,
        _ => 1,
    }
}
