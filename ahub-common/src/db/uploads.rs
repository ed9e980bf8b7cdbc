//! Upload slot persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_ts, parse_uuid, ts};
use crate::models::Upload;
use crate::{Error, Result};

fn upload_from_row(row: &SqliteRow) -> Result<Upload> {
    Ok(Upload {
        id: parse_uuid(row.try_get("id")?)?,
        team_id: parse_uuid(row.try_get("team_id")?)?,
        object_key: row.try_get("object_key")?,
        filename: row.try_get("filename")?,
        content_type: row.try_get("content_type")?,
        purpose: row.try_get::<&str, _>("purpose")?.parse()?,
        created_at: parse_ts(row.try_get("created_at")?)?,
    })
}

pub async fn save_upload(pool: &SqlitePool, upload: &Upload) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO uploads (id, team_id, object_key, filename, content_type, purpose, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(upload.id.to_string())
    .bind(upload.team_id.to_string())
    .bind(&upload.object_key)
    .bind(&upload.filename)
    .bind(&upload.content_type)
    .bind(upload.purpose.as_str())
    .bind(ts(&upload.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a team's upload, or fail with `NotFound`
pub async fn get_upload(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<Upload> {
    let row = sqlx::query(
        r#"
        SELECT id, team_id, object_key, filename, content_type, purpose, created_at
        FROM uploads
        WHERE team_id = ? AND id = ?
        "#,
    )
    .bind(team_id.to_string())
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => upload_from_row(&row),
        None => Err(Error::NotFound(format!("Upload not found: {}", id))),
    }
}
