use anyhow::{Context, Result};
use autopilot_core::telemetry::{init_telemetry, TelemetryConfig};
use autopilot_core::TemplateProvider;
use autopilot_storage::StorageBackend;
use autopilot_worker::{WorkerConfig, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - OTEL_SERVICE_NAME: Service name (default: "autopilot-worker")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "autopilot_worker=info,autopilot_core=info")
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "autopilot" {
        telemetry_config.service_name = "autopilot-worker".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some(
            "autopilot_worker=info,autopilot_core=info,autopilot_durable=info".to_string(),
        );
    }
    init_telemetry(telemetry_config);

    tracing::info!("autopilot-worker starting...");

    let config = WorkerConfig::from_env();
    let backend = StorageBackend::from_env()
        .await
        .context("Failed to initialize storage")?;
    if backend.is_dev_mode() {
        tracing::warn!(
            "worker running on in-memory storage; it only sees jobs enqueued by this process"
        );
    }

    let runtime = WorkerRuntime::from_backend(&backend, &config)
        .await
        .context("Failed to assemble worker runtime")?;

    tracing::info!(
        worker_id = %config.worker_id,
        templates = runtime.templates.list().len(),
        "Starting workflow worker"
    );

    let worker = runtime.worker(&config);
    worker.start().await.context("Failed to start worker pools")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    worker.shutdown().await.context("Worker shutdown failed")?;
    tracing::info!("Worker shutdown complete");
    Ok(())
}
