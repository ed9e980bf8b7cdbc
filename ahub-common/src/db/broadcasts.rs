//! Broadcast persistence (drafts only; nothing is sent from here)

use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{now, parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::models::{Broadcast, BroadcastPatch, BroadcastStatus, EmailEventType, EventCounts, NewBroadcast};
use crate::pagination::{calculate_pagination, Page};
use crate::{Error, Result};

const BROADCAST_COLUMNS: &str =
    "id, team_id, name, subject, list_id, status, scheduled_at, created_at, updated_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastQuery {
    pub status: Option<BroadcastStatus>,
    #[serde(default = "default_page")]
    pub page: i64,
    pub per_page: Option<i64>,
}

fn default_page() -> i64 {
    1
}

fn broadcast_from_row(row: &SqliteRow) -> Result<Broadcast> {
    Ok(Broadcast {
        id: parse_uuid(row.try_get("id")?)?,
        team_id: parse_uuid(row.try_get("team_id")?)?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        list_id: parse_opt_uuid(row.try_get("list_id")?)?,
        status: row.try_get::<&str, _>("status")?.parse()?,
        scheduled_at: parse_opt_ts(row.try_get("scheduled_at")?)?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
    })
}

fn required_text(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

pub async fn create_broadcast(pool: &SqlitePool, team_id: Uuid, new: NewBroadcast) -> Result<Broadcast> {
    if let Some(list_id) = new.list_id {
        super::lists::get_live_list(pool, team_id, list_id).await?;
    }

    let created_at = now();
    let broadcast = Broadcast {
        id: Uuid::new_v4(),
        team_id,
        name: required_text(&new.name, "name")?,
        subject: required_text(&new.subject, "subject")?,
        list_id: new.list_id,
        status: BroadcastStatus::Draft,
        scheduled_at: None,
        created_at,
        updated_at: created_at,
    };

    sqlx::query(&format!(
        "INSERT INTO broadcasts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        BROADCAST_COLUMNS
    ))
    .bind(broadcast.id.to_string())
    .bind(team_id.to_string())
    .bind(&broadcast.name)
    .bind(&broadcast.subject)
    .bind(broadcast.list_id.map(|id| id.to_string()))
    .bind(broadcast.status.as_str())
    .bind(broadcast.scheduled_at.as_ref().map(ts))
    .bind(ts(&broadcast.created_at))
    .bind(ts(&broadcast.updated_at))
    .execute(pool)
    .await?;

    Ok(broadcast)
}

pub async fn get_broadcast(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<Broadcast> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM broadcasts WHERE team_id = ? AND id = ?",
        BROADCAST_COLUMNS
    ))
    .bind(team_id.to_string())
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => broadcast_from_row(&row),
        None => Err(Error::NotFound(format!("Broadcast not found: {}", id))),
    }
}

/// Edit a draft; setting `scheduled_at` moves it to `scheduled`
pub async fn update_broadcast(
    pool: &SqlitePool,
    team_id: Uuid,
    id: Uuid,
    patch: BroadcastPatch,
) -> Result<Broadcast> {
    let mut broadcast = get_broadcast(pool, team_id, id).await?;
    if broadcast.status != BroadcastStatus::Draft {
        return Err(Error::Conflict(format!(
            "Broadcast {} is {} and can no longer be edited",
            id,
            broadcast.status.as_str()
        )));
    }

    if let Some(name) = patch.name {
        broadcast.name = required_text(&name, "name")?;
    }
    if let Some(subject) = patch.subject {
        broadcast.subject = required_text(&subject, "subject")?;
    }
    if let Some(list_id) = patch.list_id {
        super::lists::get_live_list(pool, team_id, list_id).await?;
        broadcast.list_id = Some(list_id);
    }
    if let Some(at) = patch.scheduled_at {
        if broadcast.list_id.is_none() {
            return Err(Error::InvalidInput(
                "A broadcast needs a list before it can be scheduled".to_string(),
            ));
        }
        broadcast.scheduled_at = Some(at);
        broadcast.status = BroadcastStatus::Scheduled;
    }
    broadcast.updated_at = now();

    sqlx::query(
        r#"
        UPDATE broadcasts SET name = ?, subject = ?, list_id = ?, status = ?,
            scheduled_at = ?, updated_at = ?
        WHERE team_id = ? AND id = ?
        "#,
    )
    .bind(&broadcast.name)
    .bind(&broadcast.subject)
    .bind(broadcast.list_id.map(|id| id.to_string()))
    .bind(broadcast.status.as_str())
    .bind(broadcast.scheduled_at.as_ref().map(ts))
    .bind(ts(&broadcast.updated_at))
    .bind(team_id.to_string())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(broadcast)
}

/// Hard delete; only drafts may be removed
pub async fn delete_broadcast(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<()> {
    let broadcast = get_broadcast(pool, team_id, id).await?;
    if broadcast.status != BroadcastStatus::Draft {
        return Err(Error::Conflict(format!(
            "Only draft broadcasts can be deleted; {} is {}",
            id,
            broadcast.status.as_str()
        )));
    }

    sqlx::query("DELETE FROM broadcasts WHERE team_id = ? AND id = ?")
        .bind(team_id.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn list_broadcasts(pool: &SqlitePool, team_id: Uuid, query: &BroadcastQuery) -> Result<Page<Broadcast>> {
    fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, team_id: Uuid, query: &BroadcastQuery) {
        qb.push(" WHERE team_id = ").push_bind(team_id.to_string());
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
    }

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM broadcasts");
    push_conditions(&mut count_qb, team_id, query);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let p = calculate_pagination(total, query.page, query.per_page);
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM broadcasts", BROADCAST_COLUMNS));
    push_conditions(&mut qb, team_id, query);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(p.per_page)
        .push(" OFFSET ")
        .push_bind(p.offset);

    let rows = qb.build().fetch_all(pool).await?;
    let items = rows.iter().map(broadcast_from_row).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, total, p))
}

/// Per-type event counts recorded against a broadcast
pub async fn event_counts(pool: &SqlitePool, broadcast_id: Uuid) -> Result<EventCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT event_type, COUNT(*) FROM email_events WHERE broadcast_id = ? GROUP BY event_type",
    )
    .bind(broadcast_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts = EventCounts::new();
    for (event_type, count) in rows {
        let event_type: EmailEventType = serde_json::from_value(serde_json::Value::String(event_type))?;
        counts.insert(event_type, count);
    }
    Ok(counts)
}
