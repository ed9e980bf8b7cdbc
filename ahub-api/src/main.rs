//! ahub-api - AudienceHub REST API
//!
//! Contacts, audience lists, presigned uploads, CSV imports, broadcasts and
//! the email-event webhook. With an in-memory queue the import worker runs
//! inside this process.

use std::path::PathBuf;

use ahub_common::config::{AppConfig, QueueKind};
use ahub_common::events::EventBus;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ahub_api::{AppState, EVENT_BUS_CAPACITY};
use ahub_worker::Worker;

/// Command-line arguments for ahub-api
#[derive(Parser, Debug)]
#[command(name = "ahub-api")]
#[command(about = "AudienceHub REST API")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "AHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:5780
    #[arg(short, long, env = "AHUB_BIND")]
    bind: Option<String>,

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
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ahub_api={level},ahub_worker={level},ahub_common={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting ahub-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    info!("Database: {}", config.database.path.display());
    let db = ahub_common::db::init_database(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let store = ahub_common::storage::build_object_store(&config).context("Failed to configure object storage")?;
    let queue = ahub_common::queue::build_job_queue(&config).context("Failed to configure job queue")?;
    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    let bind = config.server.bind.clone();
    let state = AppState::new(db, config, store, queue, event_bus);

    let shutdown = CancellationToken::new();
    let worker_handle = if state.config.queue.kind == QueueKind::Memory {
        info!("In-memory queue: running the import worker in-process");
        let worker = Worker::new(state.import_context(), state.queue.clone(), &state.config.queue);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        None
    };

    let app = ahub_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_token.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        handle.await.context("Embedded worker panicked")?;
    }

    info!("Server shutdown complete");
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
