//! Audience list persistence and membership

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::contacts::{self, ContactQuery, MembershipScope};
use super::{like_pattern, now, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::models::{
    clean_optional, normalize_list_name, validate_kind_filter, AudienceList, ContactFilter,
    ListKind, ListPatch, NewList,
};
use crate::pagination::{calculate_pagination, DeletedFilter, Page};
use crate::{Error, Result};

const LIST_COLUMNS: &str = "l.id, l.team_id, l.name, l.description, l.kind, l.filter, \
     l.created_at, l.updated_at, l.deleted_at";

/// Largest id set accepted by one membership call
pub const MAX_MEMBER_IDS: usize = 1000;

/// Listing options for audience lists
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    pub kind: Option<ListKind>,
    #[serde(default)]
    pub deleted: DeletedFilter,
    #[serde(default = "default_page")]
    pub page: i64,
    pub per_page: Option<i64>,
}

fn default_page() -> i64 {
    1
}

/// Row decode without `member_count`, which needs its own query
fn list_from_row(row: &SqliteRow) -> Result<AudienceList> {
    let filter: Option<String> = row.try_get("filter")?;
    let filter = filter
        .map(|f| serde_json::from_str::<ContactFilter>(&f))
        .transpose()?;

    Ok(AudienceList {
        id: parse_uuid(row.try_get("id")?)?,
        team_id: parse_uuid(row.try_get("team_id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: row.try_get::<&str, _>("kind")?.parse()?,
        filter,
        member_count: 0,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
        deleted_at: parse_opt_ts(row.try_get("deleted_at")?)?,
    })
}

fn name_conflict(err: Error, name: &str) -> Error {
    if err.is_unique_violation() {
        Error::Conflict(format!("A list named '{}' already exists", name))
    } else {
        err
    }
}

fn filter_json(filter: Option<&ContactFilter>) -> Result<Option<String>> {
    Ok(filter.map(serde_json::to_string).transpose()?)
}

/// Membership scope of a list for contact queries
pub fn scope_of(list: &AudienceList) -> MembershipScope {
    match (&list.kind, &list.filter) {
        (ListKind::Dynamic, Some(filter)) => MembershipScope::Dynamic(filter.clone()),
        _ => MembershipScope::Static(list.id),
    }
}

/// Live member count (dynamic lists are evaluated now)
pub async fn member_count(pool: &SqlitePool, list: &AudienceList) -> Result<i64> {
    let query = ContactQuery {
        scope: Some(scope_of(list)),
        ..Default::default()
    };
    contacts::count_contacts(pool, list.team_id, &query).await
}

async fn fetch_list(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<Option<AudienceList>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM lists l WHERE l.team_id = ? AND l.id = ?",
        LIST_COLUMNS
    ))
    .bind(team_id.to_string())
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(list_from_row).transpose()
}

/// Fetch a list with its member count, or fail with `NotFound`
pub async fn get_list(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<AudienceList> {
    let mut list = fetch_list(pool, team_id, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("List not found: {}", id)))?;
    list.member_count = member_count(pool, &list).await?;
    Ok(list)
}

/// Fetch a live (not soft-deleted) list, or fail with `NotFound`
pub async fn get_live_list(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<AudienceList> {
    let list = get_list(pool, team_id, id).await?;
    if list.deleted_at.is_some() {
        return Err(Error::NotFound(format!("List not found: {}", id)));
    }
    Ok(list)
}

pub async fn create_list(pool: &SqlitePool, team_id: Uuid, new: NewList) -> Result<AudienceList> {
    let name = normalize_list_name(&new.name)?;
    validate_kind_filter(new.kind, new.filter.as_ref())?;

    let created_at = now();
    let mut list = AudienceList {
        id: Uuid::new_v4(),
        team_id,
        name,
        description: clean_optional(new.description),
        kind: new.kind,
        filter: new.filter,
        member_count: 0,
        created_at,
        updated_at: created_at,
        deleted_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO lists (id, team_id, name, description, kind, filter, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(list.id.to_string())
    .bind(team_id.to_string())
    .bind(&list.name)
    .bind(&list.description)
    .bind(list.kind.as_str())
    .bind(filter_json(list.filter.as_ref())?)
    .bind(ts(&list.created_at))
    .bind(ts(&list.updated_at))
    .execute(pool)
    .await
    .map_err(|e| name_conflict(e.into(), &list.name))?;

    list.member_count = member_count(pool, &list).await?;
    Ok(list)
}

pub async fn update_list(pool: &SqlitePool, team_id: Uuid, id: Uuid, patch: ListPatch) -> Result<AudienceList> {
    let mut list = get_list(pool, team_id, id).await?;
    if list.deleted_at.is_some() {
        return Err(Error::Conflict(format!("List {} is deleted; restore it before editing", id)));
    }

    if let Some(kind) = patch.kind {
        if kind != list.kind {
            return Err(Error::InvalidInput(format!(
                "List kind cannot change from {} to {}",
                list.kind.as_str(),
                kind.as_str()
            )));
        }
    }
    if let Some(name) = patch.name {
        list.name = normalize_list_name(&name)?;
    }
    if patch.description.is_some() {
        list.description = clean_optional(patch.description);
    }
    if let Some(filter) = patch.filter {
        if list.kind == ListKind::Static {
            return Err(Error::InvalidInput("Static lists cannot have a filter".to_string()));
        }
        filter.validate()?;
        list.filter = Some(filter);
    }
    list.updated_at = now();

    sqlx::query(
        "UPDATE lists SET name = ?, description = ?, filter = ?, updated_at = ? WHERE team_id = ? AND id = ?",
    )
    .bind(&list.name)
    .bind(&list.description)
    .bind(filter_json(list.filter.as_ref())?)
    .bind(ts(&list.updated_at))
    .bind(team_id.to_string())
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| name_conflict(e.into(), &list.name))?;

    list.member_count = member_count(pool, &list).await?;
    Ok(list)
}

/// Soft delete; memberships are kept so a restore brings them back
pub async fn delete_list(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<AudienceList> {
    let mut list = get_list(pool, team_id, id).await?;
    if list.deleted_at.is_some() {
        return Ok(list);
    }

    let at = now();
    sqlx::query("UPDATE lists SET deleted_at = ?, updated_at = ? WHERE team_id = ? AND id = ?")
        .bind(ts(&at))
        .bind(ts(&at))
        .bind(team_id.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    list.deleted_at = Some(at);
    list.updated_at = at;
    Ok(list)
}

/// Restore a soft-deleted list; fails if a live list took its name meanwhile
pub async fn restore_list(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<AudienceList> {
    let mut list = get_list(pool, team_id, id).await?;
    if list.deleted_at.is_none() {
        return Ok(list);
    }

    let at = now();
    sqlx::query("UPDATE lists SET deleted_at = NULL, updated_at = ? WHERE team_id = ? AND id = ?")
        .bind(ts(&at))
        .bind(team_id.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| name_conflict(e.into(), &list.name))?;

    list.deleted_at = None;
    list.updated_at = at;
    Ok(list)
}

pub async fn list_lists(pool: &SqlitePool, team_id: Uuid, query: &ListQuery) -> Result<Page<AudienceList>> {
    fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, team_id: Uuid, query: &ListQuery) {
        qb.push(" WHERE l.team_id = ").push_bind(team_id.to_string());
        if let Some(predicate) = query.deleted.predicate("l.deleted_at") {
            qb.push(" AND ").push(predicate);
        }
        if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            qb.push(" AND l.name LIKE ")
                .push_bind(like_pattern(q))
                .push(" ESCAPE '\\'");
        }
        if let Some(kind) = query.kind {
            qb.push(" AND l.kind = ").push_bind(kind.as_str());
        }
    }

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM lists l");
    push_conditions(&mut count_qb, team_id, query);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let p = calculate_pagination(total, query.page, query.per_page);
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM lists l", LIST_COLUMNS));
    push_conditions(&mut qb, team_id, query);
    qb.push(" ORDER BY l.name COLLATE NOCASE ASC, l.id ASC LIMIT ")
        .push_bind(p.per_page)
        .push(" OFFSET ")
        .push_bind(p.offset);

    let rows = qb.build().fetch_all(pool).await?;
    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut list = list_from_row(row)?;
        list.member_count = member_count(pool, &list).await?;
        items.push(list);
    }

    Ok(Page::new(items, total, p))
}

/// Resolve the membership scope of a live list for contact queries
pub async fn membership_scope(pool: &SqlitePool, team_id: Uuid, list_id: Uuid) -> Result<MembershipScope> {
    let list = fetch_list(pool, team_id, list_id)
        .await?
        .filter(|l| l.deleted_at.is_none())
        .ok_or_else(|| Error::NotFound(format!("List not found: {}", list_id)))?;
    Ok(scope_of(&list))
}

fn check_member_ids(ids: &[Uuid]) -> Result<()> {
    if ids.is_empty() {
        return Err(Error::InvalidInput("contact_ids must not be empty".to_string()));
    }
    if ids.len() > MAX_MEMBER_IDS {
        return Err(Error::InvalidInput(format!(
            "At most {} contact ids per request",
            MAX_MEMBER_IDS
        )));
    }
    Ok(())
}

/// Add contacts to a static list; existing members are ignored. Returns rows added.
pub async fn add_members(pool: &SqlitePool, team_id: Uuid, list_id: Uuid, contact_ids: &[Uuid]) -> Result<u64> {
    check_member_ids(contact_ids)?;
    let list = get_live_list(pool, team_id, list_id).await?;
    if list.kind == ListKind::Dynamic {
        return Err(Error::InvalidInput(
            "Members of a dynamic list are defined by its filter".to_string(),
        ));
    }

    let live = contacts::live_contact_ids(pool, team_id, contact_ids).await?;
    let unknown: Vec<String> = contact_ids
        .iter()
        .filter(|id| !live.contains(id))
        .map(|id| id.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Unknown or deleted contacts: {}",
            unknown.join(", ")
        )));
    }

    let mut tx = pool.begin().await?;
    let added = attach_members(&mut *tx, list_id, contact_ids, &now()).await?;
    tx.commit().await?;

    Ok(added)
}

/// Insert memberships inside the caller's transaction, ignoring existing ones
pub async fn attach_members(
    conn: &mut SqliteConnection,
    list_id: Uuid,
    contact_ids: &[Uuid],
    at: &DateTime<Utc>,
) -> Result<u64> {
    let at = ts(at);
    let mut added = 0;
    for contact_id in contact_ids {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO list_members (list_id, contact_id, added_at) VALUES (?, ?, ?)",
        )
        .bind(list_id.to_string())
        .bind(contact_id.to_string())
        .bind(&at)
        .execute(&mut *conn)
        .await?;
        added += result.rows_affected();
    }
    Ok(added)
}

/// Remove contacts from a static list. Returns rows removed.
pub async fn remove_members(pool: &SqlitePool, team_id: Uuid, list_id: Uuid, contact_ids: &[Uuid]) -> Result<u64> {
    check_member_ids(contact_ids)?;
    let list = get_live_list(pool, team_id, list_id).await?;
    if list.kind == ListKind::Dynamic {
        return Err(Error::InvalidInput(
            "Members of a dynamic list are defined by its filter".to_string(),
        ));
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM list_members WHERE list_id = ");
    qb.push_bind(list_id.to_string()).push(" AND contact_id IN (");
    let mut separated = qb.separated(", ");
    for id in contact_ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Paginated members of a live list, narrowed by `query` (its scope is replaced)
pub async fn list_members(
    pool: &SqlitePool,
    team_id: Uuid,
    list_id: Uuid,
    mut query: ContactQuery,
) -> Result<Page<crate::models::Contact>> {
    query.scope = Some(membership_scope(pool, team_id, list_id).await?);
    contacts::list_contacts(pool, team_id, &query).await
}
