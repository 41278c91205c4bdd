// Campaign automation worker
//
// Consumes the workflow queues and executes step jobs through the engine.
// The same runtime backs the standalone worker binary and the worker the
// control plane embeds in dev mode.

pub mod clients;
pub mod config;
pub mod handlers;
pub mod runner;

pub use clients::{
    ApiClient, Collaborators, HttpAnalyticsService, HttpGenerationService, HttpSchedulingAdvisor,
    HttpSocialPublisher, WebhookNotifier,
};
pub use config::{CollaboratorConfig, WorkerConfig};
pub use handlers::{registry, HandlerDeps};
pub use runner::{WorkerRuntime, WorkflowWorker};
