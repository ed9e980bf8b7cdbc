//! Presigned upload endpoints
//!
//! The API never sees file bytes: it records an upload slot and hands the
//! client a presigned PUT URL for the object store.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::Tenant;
use crate::{ApiError, ApiResult, AppState};
use ahub_common::db::{now, uploads};
use ahub_common::models::{Upload, UploadPurpose};
use ahub_common::storage::import_object_key;

/// Content types browsers and spreadsheet tools send for CSV files
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/csv",
    "application/csv",
    "application/vnd.ms-excel",
    "text/plain",
];

#[derive(Debug, Deserialize)]
pub struct CreateUploadRequest {
    pub filename: String,
    pub content_type: String,
    pub purpose: UploadPurpose,
}

#[derive(Debug, Serialize)]
pub struct UploadTicket {
    pub upload_id: Uuid,
    pub object_key: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UploadDetail {
    #[serde(flatten)]
    pub upload: Upload,
    pub download_url: String,
    pub download_expires_at: DateTime<Utc>,
}

/// Lower-cased media type without parameters (`text/csv; charset=utf-8` → `text/csv`)
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

fn validate_request(request: &CreateUploadRequest) -> Result<(), ApiError> {
    let filename = request.filename.trim();
    if filename.is_empty() {
        return Err(ApiError::BadRequest("filename is required".to_string()));
    }
    if !filename.to_lowercase().ends_with(".csv") {
        return Err(ApiError::BadRequest(format!(
            "Only .csv files can be uploaded for {}: {}",
            request.purpose.as_str(),
            filename
        )));
    }
    if !ALLOWED_CONTENT_TYPES.contains(&media_type(&request.content_type).as_str()) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported content type '{}'; expected one of {}",
            request.content_type,
            ALLOWED_CONTENT_TYPES.join(", ")
        )));
    }
    Ok(())
}

fn presign_expiry(state: &AppState) -> Duration {
    Duration::from_secs(state.config.storage.presign_expiry_secs)
}

/// POST /api/uploads
pub async fn create_upload(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    payload: Result<Json<CreateUploadRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UploadTicket>)> {
    let Json(request) = payload?;
    validate_request(&request)?;

    let id = Uuid::new_v4();
    let upload = Upload {
        id,
        team_id,
        object_key: import_object_key(team_id, id, request.filename.trim()),
        filename: request.filename.trim().to_string(),
        content_type: request.content_type.trim().to_string(),
        purpose: request.purpose,
        created_at: now(),
    };

    let presigned = state
        .store
        .presign_put(&upload.object_key, &upload.content_type, presign_expiry(&state))?;
    uploads::save_upload(&state.db, &upload).await?;
    info!(team_id = %team_id, upload_id = %id, key = %upload.object_key, "Upload slot created");

    Ok((
        StatusCode::CREATED,
        Json(UploadTicket {
            upload_id: id,
            object_key: upload.object_key,
            url: presigned.url,
            method: presigned.method,
            headers: presigned.headers,
            expires_at: presigned.expires_at,
        }),
    ))
}

/// GET /api/uploads/:id
pub async fn get_upload(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<UploadDetail>> {
    let Path(id) = path?;
    let upload = uploads::get_upload(&state.db, team_id, id).await?;
    let presigned = state.store.presign_get(&upload.object_key, presign_expiry(&state))?;

    Ok(Json(UploadDetail {
        upload,
        download_url: presigned.url,
        download_expires_at: presigned.expires_at,
    }))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/uploads", post(create_upload))
        .route("/api/uploads/:id", get(get_upload))
}
