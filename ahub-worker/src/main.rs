//! ahub-worker - import queue consumer
//!
//! Runs CSV imports enqueued by ahub-api. Needs the same database, object
//! store and queue as the API, so `queue.kind = "memory"` is rejected here
//! (the API embeds its own worker for that case).

use std::path::PathBuf;

use ahub_common::config::{AppConfig, QueueKind, StorageKind};
use ahub_common::events::EventBus;
use ahub_common::import::ImportContext;
use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ahub_worker::Worker;

/// Command-line arguments for ahub-worker
#[derive(Parser, Debug)]
#[command(name = "ahub-worker")]
#[command(about = "Import queue worker for AudienceHub")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "AHUB_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long, env = "AHUB_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "AHUB_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ahub_worker={level},ahub_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting ahub-worker v{} [{}] ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE")
    );

    if config.queue.kind == QueueKind::Memory {
        bail!("queue.kind = \"memory\" only works inside ahub-api; configure an SQS queue for a standalone worker");
    }
    if config.storage.kind == StorageKind::Memory {
        warn!("storage.kind = \"memory\": this process cannot see files uploaded through the API");
    }

    info!("Database: {}", config.database.path.display());
    let db = ahub_common::db::init_database(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    let store = ahub_common::storage::build_object_store(&config).context("Failed to configure object storage")?;
    let queue = ahub_common::queue::build_job_queue(&config).context("Failed to configure job queue")?;

    // nothing subscribes in a standalone worker; progress is read from the database
    let ctx = ImportContext {
        db,
        store,
        events: EventBus::new(16),
        config: config.import.clone(),
    };
    let worker = Worker::new(ctx, queue, &config.queue);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    worker.run(shutdown).await;
    info!("Worker shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
