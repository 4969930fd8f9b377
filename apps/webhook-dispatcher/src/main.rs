//! Webhook dispatcher: control API plus the delivery worker pool.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use talent_webhooks::{webhooks_router, WebhookService, WebhooksState};

use crate::config::{DispatcherConfig, LogFormat};

const DEFAULT_LOG_FILTER: &str = "info,talent_webhooks=debug";

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true),
            )
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = DispatcherConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    init_logging(config.log_format);

    tracing::info!(
        listen_addr = %config.listen_addr,
        max_attempts = config.webhook.max_attempts,
        worker_concurrency = config.webhook.worker_concurrency,
        request_timeout_ms = config.webhook.request_timeout.as_millis() as u64,
        allow_private_hosts = config.webhook.allow_private_hosts,
        state_path = ?config.webhook.state_path,
        "starting webhook dispatcher"
    );

    let (service, worker) = WebhookService::new(config.webhook.clone()).unwrap_or_else(|e| {
        eprintln!("Service initialization error: {e}");
        std::process::exit(1);
    });
    let service = Arc::new(service);
    let worker_task = tokio::spawn(worker.run());
    let snapshot_task = config.webhook.state_path.is_some().then(|| {
        tokio::spawn(snapshot_loop(
            Arc::clone(&service),
            config.webhook.snapshot_interval,
        ))
    });

    let app = webhooks_router(WebhooksState::new(Arc::clone(&service)));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Failed to bind {}: {e}", config.listen_addr);
            std::process::exit(1);
        });

    tracing::info!(listen_addr = %config.listen_addr, "webhook control API listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // Stop taking jobs and let in-flight attempts finish
    service.shutdown();
    if let Err(e) = worker_task.await {
        tracing::error!(error = %e, "Webhook worker task failed");
    }

    if let Some(task) = snapshot_task {
        task.abort();
    }
    if let Err(e) = Arc::clone(&service).persist_in_background().await {
        tracing::error!(error = %e, "Failed to write final state snapshot");
    }

    tracing::info!("webhook dispatcher stopped");
}

/// Write the state snapshot on a fixed period, off the async workers.
async fn snapshot_loop(service: Arc<WebhookService>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = Arc::clone(&service).persist_in_background().await {
            tracing::warn!(error = %e, "Failed to write state snapshot");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
