//! TaskRelay Dispatcher Daemon - Main Entry Point
//!
//! Composition root: polls the outbox store and hands claimed records to the
//! external workflow engine. Enqueueing happens in the business services that
//! share the store; this process only dispatches.

mod config;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::DaemonConfig;
use taskrelay_core::application::{shutdown_channel, Dispatcher, RetryPolicy};
use taskrelay_core::port::time_provider::SystemTimeProvider;
use taskrelay_engine_client::WorkflowEngineClient;
use taskrelay_infra_sqlite::{create_pool, run_migrations, SqliteOutboxRepository};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (JSON for production, pretty for development)
    let log_format = std::env::var("TASKRELAY_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("taskrelay=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("TaskRelay dispatcher v{} starting...", VERSION);

    // 2. Load configuration
    let config = DaemonConfig::from_env();

    info!(db_path = %config.db_path, "Initializing database...");

    // 3. Initialize database
    let pool = create_pool(&config.db_path).await?;
    run_migrations(&pool).await?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let outbox_repo = Arc::new(SqliteOutboxRepository::new(pool));

    info!(engine_url = %config.engine_url, "Connecting workflow engine client...");
    let engine = Arc::new(WorkflowEngineClient::connect(&config.engine_url)?);

    let retry_policy = Arc::new(RetryPolicy::new());

    let dispatcher = Dispatcher::new(
        outbox_repo,
        engine,
        retry_policy,
        time_provider,
        config.dispatcher.clone(),
    );

    // 5. Start dispatcher loop
    info!(worker_id = %dispatcher.worker_id(), "Starting dispatcher...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher.run(shutdown_rx).await {
            tracing::error!(error = ?e, "Dispatcher failed");
        }
    });

    info!("Dispatcher running. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown
    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), dispatcher_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
