//! Health check endpoint

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::AppState;

/// Returns status, module name, version and build commit
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub build: String,
    pub uptime_secs: i64,
}

/// GET /health
///
/// No tenant header needed. Reports `degraded` with 503 when the database
/// does not answer.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, code) = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ("ok", StatusCode::OK),
        Err(e) => {
            warn!(error = %e, "Health check: database unreachable");
            ("degraded", StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            module: "ahub-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build: env!("GIT_HASH").to_string(),
            uptime_secs: (chrono::Utc::now() - state.startup_time).num_seconds(),
        }),
    )
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
