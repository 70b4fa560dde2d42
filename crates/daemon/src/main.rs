//! jobq Daemon - Main Entry Point
//!
//! Hosts the job server: migrations, the lease sweep, and graceful shutdown.

mod config;

use anyhow::{Context, Result};
use config::{DaemonConfig, LogFormat};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobq_core::application::{JobServer, QueueEngine};
use jobq_core::port::id_provider::UuidProvider;
use jobq_core::port::time_provider::SystemTimeProvider;
use jobq_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = DaemonConfig::from_env()?;

    // 2. Initialize logging
    init_logging(config.log_format)?;
    info!("jobq daemon v{} starting...", VERSION);

    // 3. Initialize database
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    let db_path = config.db_path.to_string_lossy().into_owned();
    info!(db_path = %db_path, "Initializing database...");

    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Wire the engine
    let time_provider = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteJobStore::new(pool.clone(), time_provider.clone()));
    let engine = Arc::new(QueueEngine::new(
        store,
        time_provider,
        Arc::new(UuidProvider),
        config.queue.clone(),
    ));
    let server = JobServer::new(engine);

    // 5. Start the job server (sweep loop + getWork)
    server.start().await;
    info!("System ready. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received. Draining running jobs...");

    // 7. Graceful shutdown
    match server.shutdown(None).await {
        Ok(0) => {}
        Ok(failed) => warn!(failed, "Jobs still running at shutdown were failed"),
        Err(e) => error!(error = %e, "Job server shutdown failed"),
    }
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}

fn init_logging(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("jobq=info"))
        .context("Failed to create env filter")?;

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init(),
    }
    Ok(())
}
