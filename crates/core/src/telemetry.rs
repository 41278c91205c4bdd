// Logging setup
//
// Structured console logging through tracing-subscriber, shared by the API
// server and the worker binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Span name for one handler execution, e.g. `job social.publish`.
pub fn job_span_name(job_name: &str) -> String {
    format!("job {}", job_name)
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Reported on startup so mixed api/worker logs can be told apart.
    pub service_name: String,
    pub service_version: Option<String>,
    pub environment: Option<String>,
    /// Log filter (e.g. "info", "autopilot_core=debug").
    pub log_filter: Option<String>,
    /// Include module targets in log lines.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "autopilot".to_string(),
            service_version: None,
            environment: None,
            log_filter: None,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `OTEL_SERVICE_NAME`: Service name (default: "autopilot")
    /// - `OTEL_SERVICE_VERSION`: Service version
    /// - `OTEL_ENVIRONMENT`: Deployment environment
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "autopilot".to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION").ok(),
            environment: std::env::var("OTEL_ENVIRONMENT").ok(),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            with_target: true,
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global subscriber.
///
/// Safe to call more than once: later calls (e.g. an embedded worker started
/// inside the API process) leave the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_filter(config.filter());

    if tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
        return;
    }

    tracing::info!(
        service = %config.service_name,
        version = ?config.service_version,
        environment = ?config.environment,
        "logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "autopilot");
        assert!(config.log_filter.is_none());
        assert!(config.with_target);
    }

    #[test]
    fn test_invalid_filter_falls_back_to_info() {
        let config = TelemetryConfig {
            log_filter: Some("[[not a filter".to_string()),
            ..Default::default()
        };
        assert_eq!(config.filter().to_string(), "info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_telemetry(TelemetryConfig::default().with_service_name("first"));
        init_telemetry(TelemetryConfig::default().with_service_name("second"));
    }

    #[test]
    fn test_job_span_name() {
        assert_eq!(job_span_name("social.publish"), "job social.publish");
    }
}
