//! ahub-api library - AudienceHub REST API
//!
//! Exposes the router and state so integration tests can drive the API
//! without binding a socket.

pub mod api;
pub mod error;

pub use crate::error::{ApiError, ApiResult};

use ahub_common::config::AppConfig;
use ahub_common::events::EventBus;
use ahub_common::import::ImportContext;
use ahub_common::queue::JobQueue;
use ahub_common::storage::ObjectStore;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Events buffered per SSE subscriber before it starts lagging
pub const EVENT_BUS_CAPACITY: usize = 1000;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn JobQueue>,
    /// Import progress from pipelines running in this process
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: AppConfig,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            store,
            queue,
            event_bus,
            startup_time: Utc::now(),
        }
    }

    /// Context for running imports in this process (embedded worker)
    pub fn import_context(&self) -> ImportContext {
        ImportContext {
            db: self.db.clone(),
            store: self.store.clone(),
            events: self.event_bus.clone(),
            config: self.config.import.clone(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::team_routes())
        .merge(api::contact_routes())
        .merge(api::list_routes())
        .merge(api::upload_routes())
        .merge(api::import_routes())
        .merge(api::broadcast_routes())
        .merge(api::webhook_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
