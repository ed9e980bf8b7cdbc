//! Team endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState};
use ahub_common::db::teams;
use ahub_common::models::Team;

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
}

/// POST /api/teams
pub async fn create_team(
    State(state): State<AppState>,
    payload: Result<Json<CreateTeamRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Team>)> {
    let Json(request) = payload?;
    let team = teams::create_team(&state.db, &request.name).await?;
    info!(team_id = %team.id, "Team created");
    Ok((StatusCode::CREATED, Json(team)))
}

/// GET /api/teams/:id
pub async fn get_team(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Team>> {
    let Path(id) = path?;
    teams::get_team(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Team not found: {}", id)))
}

pub fn team_routes() -> Router<AppState> {
    Router::new()
        .route("/api/teams", post(create_team))
        .route("/api/teams/:id", get(get_team))
}
