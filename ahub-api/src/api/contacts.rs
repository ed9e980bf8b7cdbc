//! Contact endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::Tenant;
use crate::{ApiError, ApiResult, AppState};
use ahub_common::db::contacts::{self, ContactQuery, ContactSort, MAX_BULK_IDS};
use ahub_common::db::lists;
use ahub_common::models::{Contact, ContactFilter, ContactPatch, ContactSource, ContactStatus, NewContact};
use ahub_common::pagination::{DeletedFilter, Page, SortOrder};

/// Query string accepted by contact listings (and list member listings)
#[derive(Debug, Default, Deserialize)]
pub struct ContactListParams {
    pub q: Option<String>,
    pub status: Option<ContactStatus>,
    pub source: Option<ContactSource>,
    pub list_id: Option<Uuid>,
    #[serde(default)]
    pub deleted: DeletedFilter,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort: ContactSort,
    pub order: Option<SortOrder>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ContactListParams {
    /// Query without a list scope
    pub fn into_query(self) -> ContactQuery {
        ContactQuery {
            filter: ContactFilter {
                q: self.q.filter(|q| !q.trim().is_empty()),
                status: self.status,
                source: self.source,
                created_after: self.created_after,
                created_before: self.created_before,
                ..Default::default()
            },
            scope: None,
            deleted: self.deleted,
            sort: self.sort,
            order: self.order,
            page: self.page.unwrap_or(1),
            per_page: self.per_page,
        }
    }
}

/// A contact with the static lists it belongs to
#[derive(Debug, Serialize)]
pub struct ContactDetail {
    #[serde(flatten)]
    pub contact: Contact,
    pub list_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Delete,
    Restore,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub action: BulkAction,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub affected: u64,
}

/// GET /api/contacts
pub async fn list_contacts(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    params: Result<Query<ContactListParams>, QueryRejection>,
) -> ApiResult<Json<Page<Contact>>> {
    let Query(params) = params?;
    let list_id = params.list_id;
    let mut query = params.into_query();
    if let Some(list_id) = list_id {
        query.scope = Some(lists::membership_scope(&state.db, team_id, list_id).await?);
    }

    Ok(Json(contacts::list_contacts(&state.db, team_id, &query).await?))
}

/// POST /api/contacts
pub async fn create_contact(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    payload: Result<Json<NewContact>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Contact>)> {
    let Json(new) = payload?;
    let contact = contacts::create_contact(&state.db, team_id, new).await?;
    info!(team_id = %team_id, contact_id = %contact.id, "Contact created");
    Ok((StatusCode::CREATED, Json(contact)))
}

/// GET /api/contacts/:id
pub async fn get_contact(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<ContactDetail>> {
    let Path(id) = path?;
    let contact = contacts::require_contact(&state.db, team_id, id).await?;
    let list_ids = contacts::contact_list_ids(&state.db, team_id, id).await?;
    Ok(Json(ContactDetail { contact, list_ids }))
}

/// PATCH /api/contacts/:id
pub async fn update_contact(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ContactPatch>, JsonRejection>,
) -> ApiResult<Json<Contact>> {
    let Path(id) = path?;
    let Json(patch) = payload?;
    Ok(Json(contacts::update_contact(&state.db, team_id, id, patch).await?))
}

/// DELETE /api/contacts/:id (soft delete)
pub async fn delete_contact(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Contact>> {
    let Path(id) = path?;
    let contact = contacts::delete_contact(&state.db, team_id, id).await?;
    info!(team_id = %team_id, contact_id = %id, "Contact deleted");
    Ok(Json(contact))
}

/// POST /api/contacts/:id/restore
pub async fn restore_contact(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Contact>> {
    let Path(id) = path?;
    Ok(Json(contacts::restore_contact(&state.db, team_id, id).await?))
}

/// DELETE /api/contacts/:id/purge (hard delete of a soft-deleted contact)
pub async fn purge_contact(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = path?;
    contacts::purge_contact(&state.db, team_id, id).await?;
    info!(team_id = %team_id, contact_id = %id, "Contact purged");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/contacts/bulk
pub async fn bulk_contacts(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    payload: Result<Json<BulkRequest>, JsonRejection>,
) -> ApiResult<Json<BulkResponse>> {
    let Json(request) = payload?;
    if request.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must not be empty".to_string()));
    }
    if request.ids.len() > MAX_BULK_IDS {
        return Err(ApiError::BadRequest(format!(
            "At most {} ids per bulk request",
            MAX_BULK_IDS
        )));
    }

    let deleted = matches!(request.action, BulkAction::Delete);
    let affected = contacts::bulk_set_deleted(&state.db, team_id, &request.ids, deleted).await?;
    info!(team_id = %team_id, action = ?request.action, affected, "Bulk contact update");
    Ok(Json(BulkResponse { affected }))
}

pub fn contact_routes() -> Router<AppState> {
    Router::new()
        .route("/api/contacts", get(list_contacts).post(create_contact))
        .route("/api/contacts/bulk", post(bulk_contacts))
        .route(
            "/api/contacts/:id",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
        .route("/api/contacts/:id/restore", post(restore_contact))
        .route("/api/contacts/:id/purge", delete(purge_contact))
}
