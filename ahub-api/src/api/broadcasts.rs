//! Broadcast endpoints (drafting and scheduling only, nothing is sent)

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::Tenant;
use crate::{ApiResult, AppState};
use ahub_common::db::broadcasts::{self, BroadcastQuery};
use ahub_common::models::{Broadcast, BroadcastPatch, EventCounts, NewBroadcast};
use ahub_common::pagination::Page;

/// A broadcast with its delivery event tallies
#[derive(Debug, Serialize)]
pub struct BroadcastDetail {
    #[serde(flatten)]
    pub broadcast: Broadcast,
    pub event_counts: EventCounts,
}

/// GET /api/broadcasts
pub async fn list_broadcasts(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    params: Result<Query<BroadcastQuery>, QueryRejection>,
) -> ApiResult<Json<Page<Broadcast>>> {
    let Query(query) = params?;
    Ok(Json(broadcasts::list_broadcasts(&state.db, team_id, &query).await?))
}

/// POST /api/broadcasts
pub async fn create_broadcast(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    payload: Result<Json<NewBroadcast>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Broadcast>)> {
    let Json(new) = payload?;
    let broadcast = broadcasts::create_broadcast(&state.db, team_id, new).await?;
    info!(team_id = %team_id, broadcast_id = %broadcast.id, "Broadcast drafted");
    Ok((StatusCode::CREATED, Json(broadcast)))
}

/// GET /api/broadcasts/:id
pub async fn get_broadcast(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<BroadcastDetail>> {
    let Path(id) = path?;
    let broadcast = broadcasts::get_broadcast(&state.db, team_id, id).await?;
    let event_counts = broadcasts::event_counts(&state.db, id).await?;
    Ok(Json(BroadcastDetail {
        broadcast,
        event_counts,
    }))
}

/// PATCH /api/broadcasts/:id
pub async fn update_broadcast(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<BroadcastPatch>, JsonRejection>,
) -> ApiResult<Json<Broadcast>> {
    let Path(id) = path?;
    let Json(patch) = payload?;
    let broadcast = broadcasts::update_broadcast(&state.db, team_id, id, patch).await?;
    info!(team_id = %team_id, broadcast_id = %id, status = broadcast.status.as_str(), "Broadcast updated");
    Ok(Json(broadcast))
}

/// DELETE /api/broadcasts/:id
pub async fn delete_broadcast(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = path?;
    broadcasts::delete_broadcast(&state.db, team_id, id).await?;
    info!(team_id = %team_id, broadcast_id = %id, "Broadcast deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub fn broadcast_routes() -> Router<AppState> {
    Router::new()
        .route("/api/broadcasts", get(list_broadcasts).post(create_broadcast))
        .route(
            "/api/broadcasts/:id",
            get(get_broadcast)
                .patch(update_broadcast)
                .delete(delete_broadcast),
        )
}
