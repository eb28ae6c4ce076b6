pub mod bootstrap;
pub mod handler;
pub mod health;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tokio::sync::watch;
use treejar_cache::SharedCache;
use treejar_core::config::{AppConfig, LoadOptions};
use treejar_integrations::{BatchWorker, EventDebouncer, WorkerPolicy};

use crate::handler::LoggingBatchHandler;

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use treejar_core::config::LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

/// Health and webhook routes on one listener.
pub fn app_router(
    cache: Arc<dyn SharedCache>,
    debouncer: Arc<EventDebouncer>,
    webhook_secret: Option<secrecy::SecretString>,
) -> Router {
    health::router(cache).merge(webhook::router(debouncer, webhook_secret))
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = if app.config.server.worker_enabled {
        let worker = BatchWorker::new(
            app.debouncer.clone(),
            Arc::new(LoggingBatchHandler),
            WorkerPolicy::from_config(
                &app.config.resilience,
                app.config.server.worker_poll_interval_ms,
            ),
        );
        let receiver = shutdown_rx.clone();
        Some(tokio::spawn(async move { worker.run(receiver).await }))
    } else {
        tracing::info!(
            event_name = "system.worker.disabled",
            correlation_id = "bootstrap",
            "batch worker disabled by configuration"
        );
        None
    };

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router =
        app_router(app.cache.clone(), app.debouncer.clone(), app.config.wazzup.webhook_secret.clone());

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        worker_enabled = worker.is_some(),
        "treejar-server started"
    );

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "treejar-server stopping"
    );
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => tracing::error!(
            event_name = "system.server.error",
            correlation_id = "shutdown",
            error = %error,
            "http server terminated with an error"
        ),
        Ok(Err(error)) => tracing::error!(
            event_name = "system.server.error",
            correlation_id = "shutdown",
            error = %error,
            "http server task panicked"
        ),
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "http server did not drain in time"
        ),
    }
    if let Some(worker) = worker {
        if tokio::time::timeout(grace, worker).await.is_err() {
            tracing::warn!(
                event_name = "system.worker.shutdown_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "batch worker did not stop in time"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
