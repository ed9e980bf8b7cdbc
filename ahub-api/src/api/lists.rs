//! Audience list endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::contacts::ContactListParams;
use super::Tenant;
use crate::{ApiResult, AppState};
use ahub_common::db::lists::{self, ListQuery};
use ahub_common::models::{AudienceList, Contact, ListPatch, NewList};
use ahub_common::pagination::Page;

#[derive(Debug, Deserialize)]
pub struct MembersRequest {
    pub contact_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MembersAdded {
    pub added: u64,
}

#[derive(Debug, Serialize)]
pub struct MembersRemoved {
    pub removed: u64,
}

/// GET /api/lists
pub async fn list_lists(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Page<AudienceList>>> {
    let Query(query) = params?;
    Ok(Json(lists::list_lists(&state.db, team_id, &query).await?))
}

/// POST /api/lists
pub async fn create_list(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    payload: Result<Json<NewList>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AudienceList>)> {
    let Json(new) = payload?;
    let list = lists::create_list(&state.db, team_id, new).await?;
    info!(team_id = %team_id, list_id = %list.id, kind = list.kind.as_str(), "List created");
    Ok((StatusCode::CREATED, Json(list)))
}

/// GET /api/lists/:id
pub async fn get_list(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<AudienceList>> {
    let Path(id) = path?;
    Ok(Json(lists::get_list(&state.db, team_id, id).await?))
}

/// PATCH /api/lists/:id
pub async fn update_list(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ListPatch>, JsonRejection>,
) -> ApiResult<Json<AudienceList>> {
    let Path(id) = path?;
    let Json(patch) = payload?;
    Ok(Json(lists::update_list(&state.db, team_id, id, patch).await?))
}

/// DELETE /api/lists/:id (soft delete)
pub async fn delete_list(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<AudienceList>> {
    let Path(id) = path?;
    let list = lists::delete_list(&state.db, team_id, id).await?;
    info!(team_id = %team_id, list_id = %id, "List deleted");
    Ok(Json(list))
}

/// POST /api/lists/:id/restore
pub async fn restore_list(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<AudienceList>> {
    let Path(id) = path?;
    Ok(Json(lists::restore_list(&state.db, team_id, id).await?))
}

/// GET /api/lists/:id/members
pub async fn list_members(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
    params: Result<Query<ContactListParams>, QueryRejection>,
) -> ApiResult<Json<Page<Contact>>> {
    let Path(id) = path?;
    let Query(params) = params?;
    let page = lists::list_members(&state.db, team_id, id, params.into_query()).await?;
    Ok(Json(page))
}

/// POST /api/lists/:id/members
pub async fn add_members(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MembersRequest>, JsonRejection>,
) -> ApiResult<Json<MembersAdded>> {
    let Path(id) = path?;
    let Json(request) = payload?;
    let added = lists::add_members(&state.db, team_id, id, &request.contact_ids).await?;
    info!(team_id = %team_id, list_id = %id, added, "List members added");
    Ok(Json(MembersAdded { added }))
}

/// DELETE /api/lists/:id/members
pub async fn remove_members(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<MembersRequest>, JsonRejection>,
) -> ApiResult<Json<MembersRemoved>> {
    let Path(id) = path?;
    let Json(request) = payload?;
    let removed = lists::remove_members(&state.db, team_id, id, &request.contact_ids).await?;
    Ok(Json(MembersRemoved { removed }))
}

pub fn list_routes() -> Router<AppState> {
    Router::new()
        .route("/api/lists", get(list_lists).post(create_list))
        .route(
            "/api/lists/:id",
            get(get_list).patch(update_list).delete(delete_list),
        )
        .route("/api/lists/:id/restore", post(restore_list))
        .route(
            "/api/lists/:id/members",
            get(list_members).post(add_members).delete(remove_members),
        )
}
