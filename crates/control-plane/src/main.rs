// Autopilot API server
// Decision: Without DATABASE_URL the server runs on in-memory storage with an embedded worker
// Decision: The engine is assembled by the worker crate so API and worker share one wiring

use anyhow::{Context, Result};
use autopilot_control_plane::auth::AuthConfig;
use autopilot_control_plane::{build_app, ServerConfig};
use autopilot_core::telemetry::{init_telemetry, TelemetryConfig};
use autopilot_storage::StorageBackend;
use autopilot_worker::{WorkerConfig, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - OTEL_SERVICE_NAME: Service name (default: "autopilot-control-plane")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "autopilot_control_plane=debug,tower_http=debug")
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "autopilot" {
        telemetry_config.service_name = "autopilot-control-plane".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some(
            "autopilot_control_plane=debug,autopilot_core=info,tower_http=debug".to_string(),
        );
    }
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());
    init_telemetry(telemetry_config);

    tracing::info!("autopilot-control-plane starting...");

    let server_config = ServerConfig::from_env();
    let worker_config = WorkerConfig::from_env();

    let backend = StorageBackend::from_env()
        .await
        .context("Failed to initialize storage")?;
    let dev_mode = backend.is_dev_mode();
    if dev_mode {
        tracing::warn!("DATABASE_URL not set, running on in-memory storage (state is lost on exit)");
    }

    let runtime = WorkerRuntime::from_backend(&backend, &worker_config)
        .await
        .context("Failed to assemble workflow engine")?;

    let auth_config = AuthConfig::from_env();
    tracing::info!(mode = auth_config.mode.as_str(), "Authentication configured");

    if !server_config.api_prefix.is_empty() {
        tracing::info!(prefix = %server_config.api_prefix, "API prefix configured");
    }
    if server_config.cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?server_config.cors_origins, "CORS origins configured");
    }

    let worker = if server_config.embed_worker(dev_mode) {
        let worker = runtime.worker(&worker_config);
        worker
            .start()
            .await
            .context("Failed to start embedded worker")?;
        tracing::info!(worker_id = %worker_config.worker_id, "Embedded worker started");
        Some(worker)
    } else {
        None
    };

    let app = build_app(runtime.engine.clone(), auth_config, &server_config, dev_mode);

    let listener = tokio::net::TcpListener::bind(&server_config.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", server_config.http_addr))?;
    tracing::info!("HTTP server listening on {}", server_config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(worker) = worker {
        worker
            .shutdown()
            .await
            .context("Embedded worker shutdown failed")?;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
