//! CSV import endpoints
//!
//! Creating an import only records the job and enqueues it; the worker (or
//! the embedded worker) runs the pipeline.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tracing::{info, warn};
use uuid::Uuid;

use super::sse::import_event_stream;
use super::Tenant;
use crate::{ApiError, ApiResult, AppState};
use ahub_common::db::imports::{self, ImportQuery};
use ahub_common::db::{lists, uploads};
use ahub_common::import::{self, CsvPreview};
use ahub_common::models::{ColumnMapping, ImportJob, ListKind, Upload};
use ahub_common::pagination::Page;
use ahub_common::queue::ImportMessage;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub upload_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateImportRequest {
    pub upload_id: Uuid,
    pub mapping: Option<ColumnMapping>,
    pub list_id: Option<Uuid>,
    #[serde(default = "default_update_existing")]
    pub update_existing: bool,
}

fn default_update_existing() -> bool {
    true
}

/// Download an upload's object, enforcing the configured size limit
async fn fetch_upload(state: &AppState, upload: &Upload) -> ApiResult<Bytes> {
    let bytes = state
        .store
        .get_object(&upload.object_key)
        .await
        .map_err(|e| match e {
            ahub_common::Error::NotFound(_) => ApiError::NotFound(format!(
                "Uploaded file not found for upload {}; was the upload completed?",
                upload.id
            )),
            other => ApiError::from(other),
        })?;

    let limit = state.config.import.max_file_bytes;
    if bytes.len() as u64 > limit {
        return Err(ApiError::BadRequest(format!(
            "File is {} bytes; the limit is {} bytes",
            bytes.len(),
            limit
        )));
    }
    Ok(bytes)
}

fn preview_bytes(bytes: &[u8], rows: usize) -> ApiResult<CsvPreview> {
    import::preview(bytes, rows).map_err(|e| match e {
        ahub_common::Error::Csv(err) => ApiError::BadRequest(format!("Unreadable CSV: {}", err)),
        other => ApiError::from(other),
    })
}

/// `list_id` must name a live static list of the team
async fn check_target_list(state: &AppState, team_id: Uuid, list_id: Uuid) -> ApiResult<()> {
    let list = lists::get_live_list(&state.db, team_id, list_id)
        .await
        .map_err(|e| match e {
            ahub_common::Error::NotFound(msg) => ApiError::BadRequest(msg),
            other => ApiError::from(other),
        })?;
    if list.kind != ListKind::Static {
        return Err(ApiError::BadRequest(format!(
            "List {} is dynamic; imports can only attach to static lists",
            list_id
        )));
    }
    Ok(())
}

/// POST /api/imports/preview
pub async fn preview_import(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    payload: Result<Json<PreviewRequest>, JsonRejection>,
) -> ApiResult<Json<CsvPreview>> {
    let Json(request) = payload?;
    let upload = uploads::get_upload(&state.db, team_id, request.upload_id).await?;
    let bytes = fetch_upload(&state, &upload).await?;
    Ok(Json(preview_bytes(&bytes, state.config.import.preview_rows)?))
}

/// POST /api/imports
pub async fn create_import(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    payload: Result<Json<CreateImportRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ImportJob>)> {
    let Json(request) = payload?;
    let upload = uploads::get_upload(&state.db, team_id, request.upload_id).await?;

    let mapping = match request.mapping {
        Some(mapping) => mapping,
        None => {
            let bytes = fetch_upload(&state, &upload).await?;
            preview_bytes(&bytes, 0)?.suggested_mapping
        }
    };
    mapping.validate()?;

    if let Some(list_id) = request.list_id {
        check_target_list(&state, team_id, list_id).await?;
    }

    let job = ImportJob::new(
        team_id,
        upload.id,
        request.list_id,
        mapping,
        request.update_existing,
    );
    imports::insert_import(&state.db, &job).await?;

    let message = ImportMessage {
        import_id: job.id,
        team_id,
    };
    if let Err(e) = state.queue.send(&message).await {
        warn!(import_id = %job.id, error = %e, "Failed to enqueue import");
        return Err(ApiError::Unavailable(format!(
            "Import {} was recorded but could not be queued: {}",
            job.id, e
        )));
    }

    info!(team_id = %team_id, import_id = %job.id, upload_id = %upload.id, "Import queued");
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/imports
pub async fn list_imports(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    params: Result<Query<ImportQuery>, QueryRejection>,
) -> ApiResult<Json<Page<ImportJob>>> {
    let Query(query) = params?;
    Ok(Json(imports::list_imports(&state.db, team_id, &query).await?))
}

/// GET /api/imports/:id
pub async fn get_import(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<ImportJob>> {
    let Path(id) = path?;
    Ok(Json(imports::get_import(&state.db, team_id, id).await?))
}

/// GET /api/imports/events
pub async fn import_events(
    State(state): State<AppState>,
    Tenant(team_id): Tenant,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    import_event_stream(&state, team_id)
}

pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/api/imports", get(list_imports).post(create_import))
        .route("/api/imports/preview", post(preview_import))
        .route("/api/imports/events", get(import_events))
        .route("/api/imports/:id", get(get_import))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults_to_update_existing() {
        let request: CreateImportRequest =
            serde_json::from_value(serde_json::json!({"upload_id": Uuid::nil()})).unwrap();
        assert!(request.update_existing);
        assert!(request.mapping.is_none());
        assert!(request.list_id.is_none());
    }

    #[test]
    fn test_preview_bytes_rejects_empty_file() {
        assert!(matches!(preview_bytes(b"", 5), Err(ApiError::BadRequest(_))));
    }
}
