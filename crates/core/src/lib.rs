// Campaign Automation Core
//
// This crate provides a DB-agnostic workflow engine that turns a campaign into
// a run of dependent jobs (keyword research -> content -> images -> social ->
// publish) and drives it to completion over a pluggable queue.
//
// Key design decisions:
// - Uses traits (WorkflowStore, JobQueue) for pluggable backends
// - Templates are served by an injected TemplateProvider that can be reloaded
// - Handlers are looked up by (queue, job name) in a HandlerRegistry
// - Every status transition is a compare-and-set against the store
// - External services (generation, publishing, scheduling, analytics,
//   notifications) are traits implemented by the worker crate
// - In-memory implementations back the tests and the embedded dev mode

pub mod collaborators;
pub mod engine;
pub mod error;
pub mod handler;
pub mod job;
pub mod payload;
pub mod queues;
pub mod run;
pub mod telemetry;
pub mod template;
pub mod traits;

// In-memory implementations for tests and local development
pub mod memory;

// Re-exports for convenience
pub use collaborators::{
    AnalyticsService, CollaboratorError, CollaboratorResult, Generation, GenerationRequest,
    GenerationService, LogNotifier, NewSocialPost, NotificationKind, Notifier, PostingAdvice,
    PublishReceipt, PublishRequest, SchedulingAdvisor, Severity, SocialAccount, SocialDirectory,
    SocialPost, SocialPostStatus, SocialPublisher, TrackingSetup, WorkflowNotification,
};
pub use engine::{
    reload_templates, sync_templates, Caller, Delivery, DeliveryOutcome, DispatchReason,
    DispatchReport, EngineConfig, FanOutSummary, StartAutomation, WorkflowEngine,
};
pub use error::{EngineError, QueueError, Result, StoreError};
pub use handler::{
    HandlerError, HandlerErrorKind, HandlerRegistry, HandlerRegistryBuilder, JobContext,
    JobHandler, JobOutput, PublishTarget,
};
pub use job::{JobEnvelope, JobMetadata, JobStatus, NewJob, WorkflowJob};
pub use run::{JobCounts, NewRun, RunDetail, RunFilter, RunStatus, RunSummary, WorkflowRun};
pub use template::{
    builtin_templates, parse_templates, Step, TemplateError, TemplateProvider, TemplateRegistry,
    WorkflowTemplate,
};
pub use traits::{EnqueueOptions, JobQueue, StoreResult, WorkflowStore};
