//! Import job persistence
//!
//! Status writes go through `retry_on_lock`: the worker updates jobs while the
//! API may be writing contacts to the same file.

use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, retry_on_lock, ts};
use crate::models::{ImportJob, ImportStatus};
use crate::pagination::{calculate_pagination, Page};
use crate::{Error, Result};

/// Longest time a job status write waits on a locked database
const MAX_LOCK_WAIT_MS: u64 = 5000;

const IMPORT_COLUMNS: &str = "id, team_id, upload_id, list_id, mapping, update_existing, status, \
     total_rows, created_count, updated_count, skipped_count, failed_count, errors, error_message, \
     created_at, started_at, finished_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportQuery {
    pub status: Option<ImportStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    pub per_page: Option<i64>,
}

fn default_page() -> i64 {
    1
}

fn job_from_row(row: &SqliteRow) -> Result<ImportJob> {
    let mapping: String = row.try_get("mapping")?;
    let errors: String = row.try_get("errors")?;

    Ok(ImportJob {
        id: parse_uuid(row.try_get("id")?)?,
        team_id: parse_uuid(row.try_get("team_id")?)?,
        upload_id: parse_uuid(row.try_get("upload_id")?)?,
        list_id: parse_opt_uuid(row.try_get("list_id")?)?,
        mapping: serde_json::from_str(&mapping)?,
        update_existing: row.try_get::<i64, _>("update_existing")? != 0,
        status: row.try_get::<&str, _>("status")?.parse()?,
        total_rows: row.try_get("total_rows")?,
        created_count: row.try_get("created_count")?,
        updated_count: row.try_get("updated_count")?,
        skipped_count: row.try_get("skipped_count")?,
        failed_count: row.try_get("failed_count")?,
        errors: serde_json::from_str(&errors)?,
        error_message: row.try_get("error_message")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        started_at: parse_opt_ts(row.try_get("started_at")?)?,
        finished_at: parse_opt_ts(row.try_get("finished_at")?)?,
    })
}

pub async fn insert_import(pool: &SqlitePool, job: &ImportJob) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO imports ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        IMPORT_COLUMNS
    ))
    .bind(job.id.to_string())
    .bind(job.team_id.to_string())
    .bind(job.upload_id.to_string())
    .bind(job.list_id.map(|id| id.to_string()))
    .bind(serde_json::to_string(&job.mapping)?)
    .bind(i64::from(job.update_existing))
    .bind(job.status.as_str())
    .bind(job.total_rows)
    .bind(job.created_count)
    .bind(job.updated_count)
    .bind(job.skipped_count)
    .bind(job.failed_count)
    .bind(serde_json::to_string(&job.errors)?)
    .bind(&job.error_message)
    .bind(ts(&job.created_at))
    .bind(job.started_at.as_ref().map(ts))
    .bind(job.finished_at.as_ref().map(ts))
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist status, counters and errors of a job
pub async fn save_progress(pool: &SqlitePool, job: &ImportJob) -> Result<()> {
    let id = job.id.to_string();
    let errors = serde_json::to_string(&job.errors)?;
    let started_at = job.started_at.as_ref().map(ts);
    let finished_at = job.finished_at.as_ref().map(ts);

    retry_on_lock("save_import_progress", MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            UPDATE imports SET
                status = ?, total_rows = ?, created_count = ?, updated_count = ?,
                skipped_count = ?, failed_count = ?, errors = ?, error_message = ?,
                started_at = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.total_rows)
        .bind(job.created_count)
        .bind(job.updated_count)
        .bind(job.skipped_count)
        .bind(job.failed_count)
        .bind(&errors)
        .bind(&job.error_message)
        .bind(&started_at)
        .bind(&finished_at)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Load any team's job by id (worker side; messages carry the team)
pub async fn load_import(pool: &SqlitePool, id: Uuid) -> Result<Option<ImportJob>> {
    let row = sqlx::query(&format!("SELECT {} FROM imports WHERE id = ?", IMPORT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Fetch a team's job, or fail with `NotFound`
pub async fn get_import(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<ImportJob> {
    load_import(pool, id)
        .await?
        .filter(|job| job.team_id == team_id)
        .ok_or_else(|| Error::NotFound(format!("Import not found: {}", id)))
}

/// Newest first
pub async fn list_imports(pool: &SqlitePool, team_id: Uuid, query: &ImportQuery) -> Result<Page<ImportJob>> {
    fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, team_id: Uuid, query: &ImportQuery) {
        qb.push(" WHERE team_id = ").push_bind(team_id.to_string());
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
    }

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM imports");
    push_conditions(&mut count_qb, team_id, query);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let p = calculate_pagination(total, query.page, query.per_page);
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM imports", IMPORT_COLUMNS));
    push_conditions(&mut qb, team_id, query);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(p.per_page)
        .push(" OFFSET ")
        .push_bind(p.offset);

    let rows = qb.build().fetch_all(pool).await?;
    let items = rows.iter().map(job_from_row).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, p))
}
