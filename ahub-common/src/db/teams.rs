//! Team (tenant) persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{now, parse_ts, parse_uuid, ts};
use crate::models::Team;
use crate::{Error, Result};

pub async fn create_team(pool: &SqlitePool, name: &str) -> Result<Team> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Team name is required".to_string()));
    }

    let team = Team {
        id: Uuid::new_v4(),
        name: name.to_string(),
        created_at: now(),
    };

    sqlx::query("INSERT INTO teams (id, name, created_at) VALUES (?, ?, ?)")
        .bind(team.id.to_string())
        .bind(&team.name)
        .bind(ts(&team.created_at))
        .execute(pool)
        .await?;

    Ok(team)
}

pub async fn get_team(pool: &SqlitePool, id: Uuid) -> Result<Option<Team>> {
    let row = sqlx::query("SELECT id, name, created_at FROM teams WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(team_from_row(&row)?)),
        None => Ok(None),
    }
}

fn team_from_row(row: &SqliteRow) -> Result<Team> {
    Ok(Team {
        id: parse_uuid(row.try_get("id")?)?,
        name: row.try_get("name")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
    })
}

pub async fn team_exists(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE id = ?)")
        .bind(id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(exists != 0)
}
