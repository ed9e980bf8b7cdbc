//! Contact persistence, search and CSV upsert

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use super::{like_pattern, now, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::models::{
    clean_optional, is_attribute_key, merge_attributes, normalize_email, Contact, ContactFilter,
    ContactPatch, ContactSource, ContactStatus, NewContact,
};
use crate::pagination::{calculate_pagination, DeletedFilter, Page, SortOrder};
use crate::{Error, Result};

const CONTACT_COLUMNS: &str = "c.id, c.team_id, c.email, c.first_name, c.last_name, c.phone, \
     c.company, c.status, c.attributes, c.source, c.created_at, c.updated_at, c.deleted_at";

/// Largest id set accepted by bulk operations
pub const MAX_BULK_IDS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Email,
    LastName,
}

impl ContactSort {
    fn default_order(&self) -> SortOrder {
        match self {
            ContactSort::CreatedAt | ContactSort::UpdatedAt => SortOrder::Desc,
            ContactSort::Email | ContactSort::LastName => SortOrder::Asc,
        }
    }

    fn order_clause(&self, order: SortOrder) -> String {
        let dir = order.as_sql();
        match self {
            ContactSort::CreatedAt => format!("c.created_at {dir}, c.id {dir}"),
            ContactSort::UpdatedAt => format!("c.updated_at {dir}, c.id {dir}"),
            ContactSort::Email => format!("c.email {dir}"),
            ContactSort::LastName => {
                format!("c.last_name IS NULL, c.last_name COLLATE NOCASE {dir}, c.email ASC")
            }
        }
    }
}

/// Restricts a contact query to the members of one list
#[derive(Debug, Clone)]
pub enum MembershipScope {
    Static(Uuid),
    Dynamic(ContactFilter),
}

/// Everything a contact listing can be narrowed and ordered by
#[derive(Debug, Clone, Default)]
pub struct ContactQuery {
    pub filter: ContactFilter,
    pub scope: Option<MembershipScope>,
    pub deleted: DeletedFilter,
    pub sort: ContactSort,
    pub order: Option<SortOrder>,
    pub page: i64,
    pub per_page: Option<i64>,
}

/// One contact row destined for an import upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactDraft {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub status: Option<ContactStatus>,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(Uuid),
    Updated(Uuid),
    Skipped,
}

fn contact_from_row(row: &SqliteRow) -> Result<Contact> {
    let attributes: String = row.try_get("attributes")?;
    let attributes = match serde_json::from_str::<Value>(&attributes)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Ok(Contact {
        id: parse_uuid(row.try_get("id")?)?,
        team_id: parse_uuid(row.try_get("team_id")?)?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        company: row.try_get("company")?,
        status: row.try_get::<&str, _>("status")?.parse()?,
        attributes,
        source: row.try_get::<&str, _>("source")?.parse()?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
        deleted_at: parse_opt_ts(row.try_get("deleted_at")?)?,
    })
}

fn validate_attribute_keys(attributes: &Map<String, Value>) -> Result<()> {
    match attributes.keys().find(|k| !is_attribute_key(k)) {
        Some(key) => Err(Error::InvalidInput(format!("Invalid attribute key: {}", key))),
        None => Ok(()),
    }
}

fn attributes_json(attributes: &Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string(attributes)?)
}

/// Map a UNIQUE(team_id, email) violation to a conflict naming the address
/// Lower-cased haystack for `q` searches. SQLite `LIKE` only folds ASCII.
fn search_text(email: &str, first_name: Option<&str>, last_name: Option<&str>, company: Option<&str>) -> String {
    let mut text = email.to_lowercase();
    for part in [first_name, last_name, company].into_iter().flatten() {
        text.push('\u{1f}');
        text.push_str(&part.to_lowercase());
    }
    text
}

fn contact_search_text(contact: &Contact) -> String {
    search_text(
        &contact.email,
        contact.first_name.as_deref(),
        contact.last_name.as_deref(),
        contact.company.as_deref(),
    )
}

fn email_conflict(err: Error, email: &str) -> Error {
    if err.is_unique_violation() {
        Error::Conflict(format!("A contact with email {} already exists", email))
    } else {
        err
    }
}

pub async fn get_contact(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<Option<Contact>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM contacts c WHERE c.team_id = ? AND c.id = ?",
        CONTACT_COLUMNS
    ))
    .bind(team_id.to_string())
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(contact_from_row).transpose()
}

/// Fetch a contact or fail with `NotFound`
pub async fn require_contact(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<Contact> {
    get_contact(pool, team_id, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Contact not found: {}", id)))
}

pub async fn find_by_email(pool: &SqlitePool, team_id: Uuid, email: &str) -> Result<Option<Contact>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM contacts c WHERE c.team_id = ? AND c.email = ?",
        CONTACT_COLUMNS
    ))
    .bind(team_id.to_string())
    .bind(email)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(contact_from_row).transpose()
}

pub async fn create_contact(pool: &SqlitePool, team_id: Uuid, new: NewContact) -> Result<Contact> {
    let email = normalize_email(&new.email)?;
    validate_attribute_keys(&new.attributes)?;

    if let Some(existing) = find_by_email(pool, team_id, &email).await? {
        return Err(if existing.is_deleted() {
            Error::Conflict(format!(
                "A deleted contact with email {} exists; restore contact {} instead",
                email, existing.id
            ))
        } else {
            Error::Conflict(format!("A contact with email {} already exists", email))
        });
    }

    let created_at = now();
    let contact = Contact {
        id: Uuid::new_v4(),
        team_id,
        email,
        first_name: clean_optional(new.first_name),
        last_name: clean_optional(new.last_name),
        phone: clean_optional(new.phone),
        company: clean_optional(new.company),
        status: new.status,
        attributes: new.attributes,
        source: new.source,
        created_at,
        updated_at: created_at,
        deleted_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO contacts (id, team_id, email, first_name, last_name, phone, company,
                              status, attributes, source, created_at, updated_at, search_text)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(contact.id.to_string())
    .bind(team_id.to_string())
    .bind(&contact.email)
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(&contact.phone)
    .bind(&contact.company)
    .bind(contact.status.as_str())
    .bind(attributes_json(&contact.attributes)?)
    .bind(contact.source.as_str())
    .bind(ts(&contact.created_at))
    .bind(ts(&contact.updated_at))
    .bind(contact_search_text(&contact))
    .execute(pool)
    .await
    .map_err(|e| email_conflict(e.into(), &contact.email))?;

    Ok(contact)
}

pub async fn update_contact(
    pool: &SqlitePool,
    team_id: Uuid,
    id: Uuid,
    patch: ContactPatch,
) -> Result<Contact> {
    let mut contact = require_contact(pool, team_id, id).await?;
    if contact.is_deleted() {
        return Err(Error::Conflict(format!(
            "Contact {} is deleted; restore it before editing",
            id
        )));
    }

    if let Some(raw) = patch.email {
        let email = normalize_email(&raw)?;
        if email != contact.email {
            if let Some(other) = find_by_email(pool, team_id, &email).await? {
                return Err(Error::Conflict(format!(
                    "Email {} is already used by contact {}",
                    email, other.id
                )));
            }
            contact.email = email;
        }
    }
    if patch.first_name.is_some() {
        contact.first_name = clean_optional(patch.first_name);
    }
    if patch.last_name.is_some() {
        contact.last_name = clean_optional(patch.last_name);
    }
    if patch.phone.is_some() {
        contact.phone = clean_optional(patch.phone);
    }
    if patch.company.is_some() {
        contact.company = clean_optional(patch.company);
    }
    if let Some(status) = patch.status {
        contact.status = status;
    }
    if let Some(attributes) = patch.attributes {
        validate_attribute_keys(&attributes)?;
        merge_attributes(&mut contact.attributes, attributes);
    }
    contact.updated_at = now();

    sqlx::query(
        r#"
        UPDATE contacts SET
            email = ?, first_name = ?, last_name = ?, phone = ?, company = ?,
            status = ?, attributes = ?, updated_at = ?, search_text = ?
        WHERE team_id = ? AND id = ?
        "#,
    )
    .bind(&contact.email)
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(&contact.phone)
    .bind(&contact.company)
    .bind(contact.status.as_str())
    .bind(attributes_json(&contact.attributes)?)
    .bind(ts(&contact.updated_at))
    .bind(contact_search_text(&contact))
    .bind(team_id.to_string())
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| email_conflict(e.into(), &contact.email))?;

    Ok(contact)
}

/// Soft delete; already-deleted contacts are returned unchanged
pub async fn delete_contact(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<Contact> {
    let mut contact = require_contact(pool, team_id, id).await?;
    if contact.is_deleted() {
        return Ok(contact);
    }

    let at = now();
    sqlx::query("UPDATE contacts SET deleted_at = ?, updated_at = ? WHERE team_id = ? AND id = ?")
        .bind(ts(&at))
        .bind(ts(&at))
        .bind(team_id.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    contact.deleted_at = Some(at);
    contact.updated_at = at;
    Ok(contact)
}

/// Clear `deleted_at`; live contacts are returned unchanged
pub async fn restore_contact(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<Contact> {
    let mut contact = require_contact(pool, team_id, id).await?;
    if !contact.is_deleted() {
        return Ok(contact);
    }

    let at = now();
    sqlx::query("UPDATE contacts SET deleted_at = NULL, updated_at = ? WHERE team_id = ? AND id = ?")
        .bind(ts(&at))
        .bind(team_id.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    contact.deleted_at = None;
    contact.updated_at = at;
    Ok(contact)
}

/// Permanently remove a soft-deleted contact and its list memberships
pub async fn purge_contact(pool: &SqlitePool, team_id: Uuid, id: Uuid) -> Result<()> {
    let contact = require_contact(pool, team_id, id).await?;
    if !contact.is_deleted() {
        return Err(Error::Conflict(format!(
            "Contact {} must be deleted before it can be purged",
            id
        )));
    }

    sqlx::query("DELETE FROM contacts WHERE team_id = ? AND id = ? AND deleted_at IS NOT NULL")
        .bind(team_id.to_string())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Soft delete (`deleted = true`) or restore a set of contacts; returns rows changed
pub async fn bulk_set_deleted(
    pool: &SqlitePool,
    team_id: Uuid,
    ids: &[Uuid],
    deleted: bool,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    if ids.len() > MAX_BULK_IDS {
        return Err(Error::InvalidInput(format!(
            "Bulk operations accept at most {} ids",
            MAX_BULK_IDS
        )));
    }

    let at = ts(&now());
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE contacts SET deleted_at = ");
    if deleted {
        qb.push_bind(at.clone());
    } else {
        qb.push("NULL");
    }
    qb.push(", updated_at = ")
        .push_bind(at)
        .push(" WHERE team_id = ")
        .push_bind(team_id.to_string())
        .push(if deleted {
            " AND deleted_at IS NULL"
        } else {
            " AND deleted_at IS NOT NULL"
        })
        .push(" AND id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Ids among `ids` that are live contacts of the team
pub async fn live_contact_ids(pool: &SqlitePool, team_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id FROM contacts WHERE deleted_at IS NULL AND team_id = ");
    qb.push_bind(team_id.to_string()).push(" AND id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let found: Vec<String> = qb.build_query_scalar().fetch_all(pool).await?;
    found.iter().map(|s| parse_uuid(s)).collect()
}

/// Live lists a contact is an explicit member of
pub async fn contact_list_ids(pool: &SqlitePool, team_id: Uuid, contact_id: Uuid) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT l.id FROM list_members m
        JOIN lists l ON l.id = m.list_id
        WHERE m.contact_id = ? AND l.team_id = ? AND l.deleted_at IS NULL
        ORDER BY l.name COLLATE NOCASE
        "#,
    )
    .bind(contact_id.to_string())
    .bind(team_id.to_string())
    .fetch_all(pool)
    .await?;

    ids.iter().map(|s| parse_uuid(s)).collect()
}

/// Append `AND ...` clauses for every criterion of `filter`
pub fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ContactFilter) {
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        qb.push(" AND c.search_text LIKE ")
            .push_bind(like_pattern(&q.to_lowercase()))
            .push(" ESCAPE '\\'");
    }
    if let Some(status) = filter.status {
        qb.push(" AND c.status = ").push_bind(status.as_str());
    }
    if let Some(source) = filter.source {
        qb.push(" AND c.source = ").push_bind(source.as_str());
    }
    if let Some(after) = filter.created_after {
        qb.push(" AND c.created_at >= ").push_bind(ts(&after));
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND c.created_at < ").push_bind(ts(&before));
    }
    for (key, value) in &filter.attributes {
        qb.push(" AND json_extract(c.attributes, ")
            .push_bind(format!("$.\"{}\"", key))
            .push(") = ");
        match value {
            Value::Bool(b) => {
                qb.push_bind(i64::from(*b));
            }
            Value::Number(n) => match n.as_i64() {
                Some(i) => {
                    qb.push_bind(i);
                }
                None => {
                    qb.push_bind(n.as_f64().unwrap_or(f64::NAN));
                }
            },
            Value::String(s) => {
                qb.push_bind(s.clone());
            }
            // Rejected by ContactFilter::validate; never matches
            _ => {
                qb.push("NULL");
            }
        }
    }
}

fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, team_id: Uuid, query: &ContactQuery) {
    qb.push(" WHERE c.team_id = ").push_bind(team_id.to_string());

    // Soft-deleted contacts are never list members
    let deleted = if query.scope.is_some() {
        DeletedFilter::Exclude
    } else {
        query.deleted
    };
    if let Some(predicate) = deleted.predicate("c.deleted_at") {
        qb.push(" AND ").push(predicate);
    }

    push_filter(qb, &query.filter);

    match &query.scope {
        Some(MembershipScope::Static(list_id)) => {
            qb.push(" AND c.id IN (SELECT contact_id FROM list_members WHERE list_id = ")
                .push_bind(list_id.to_string())
                .push(")");
        }
        Some(MembershipScope::Dynamic(filter)) => push_filter(qb, filter),
        None => {}
    }
}

pub async fn count_contacts(pool: &SqlitePool, team_id: Uuid, query: &ContactQuery) -> Result<i64> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM contacts c");
    push_conditions(&mut qb, team_id, query);
    let total: i64 = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(total)
}

/// Paginated, filtered contact listing
pub async fn list_contacts(pool: &SqlitePool, team_id: Uuid, query: &ContactQuery) -> Result<Page<Contact>> {
    let total = count_contacts(pool, team_id, query).await?;
    let p = calculate_pagination(total, query.page, query.per_page);

    let order = query.order.unwrap_or_else(|| query.sort.default_order());
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM contacts c", CONTACT_COLUMNS));
    push_conditions(&mut qb, team_id, query);
    qb.push(" ORDER BY ")
        .push(query.sort.order_clause(order))
        .push(" LIMIT ")
        .push_bind(p.per_page)
        .push(" OFFSET ")
        .push_bind(p.offset);

    let rows = qb.build().fetch_all(pool).await?;
    let items = rows.iter().map(contact_from_row).collect::<Result<Vec<_>>>()?;

    Ok(Page::new(items, total, p))
}

/// Force a contact's status by email (webhook side effect); returns its id if found
pub async fn set_status_by_email(
    pool: &SqlitePool,
    team_id: Uuid,
    email: &str,
    status: ContactStatus,
) -> Result<Option<Uuid>> {
    let id: Option<String> = sqlx::query_scalar(
        "UPDATE contacts SET status = ?, updated_at = ? WHERE team_id = ? AND email = ? RETURNING id",
    )
    .bind(status.as_str())
    .bind(ts(&now()))
    .bind(team_id.to_string())
    .bind(email)
    .fetch_optional(pool)
    .await?;

    id.as_deref().map(parse_uuid).transpose()
}

pub async fn id_by_email(pool: &SqlitePool, team_id: Uuid, email: &str) -> Result<Option<Uuid>> {
    let id: Option<String> =
        sqlx::query_scalar("SELECT id FROM contacts WHERE team_id = ? AND email = ?")
            .bind(team_id.to_string())
            .bind(email)
            .fetch_optional(pool)
            .await?;

    id.as_deref().map(parse_uuid).transpose()
}

/// Insert or update one imported contact inside the caller's transaction
///
/// With `update_existing`, non-empty draft fields overwrite stored ones,
/// attributes are merged and a soft-deleted contact is revived. Without it an
/// existing email is left untouched.
pub async fn upsert_contact(
    conn: &mut SqliteConnection,
    team_id: Uuid,
    draft: &ContactDraft,
    update_existing: bool,
    at: DateTime<Utc>,
) -> Result<UpsertOutcome> {
    let at = ts(&at);
    let attributes = attributes_json(&draft.attributes)?;

    if update_existing {
        let updated = sqlx::query(
            r#"
            UPDATE contacts SET
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                phone = COALESCE(?, phone),
                company = COALESCE(?, company),
                status = COALESCE(?, status),
                attributes = json_patch(attributes, ?),
                deleted_at = NULL,
                updated_at = ?
            WHERE team_id = ? AND email = ?
            RETURNING id, first_name, last_name, company
            "#,
        )
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.phone)
        .bind(&draft.company)
        .bind(draft.status.map(|s| s.as_str()))
        .bind(&attributes)
        .bind(&at)
        .bind(team_id.to_string())
        .bind(&draft.email)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = updated {
            let id: String = row.try_get("id")?;
            let first_name: Option<String> = row.try_get("first_name")?;
            let last_name: Option<String> = row.try_get("last_name")?;
            let company: Option<String> = row.try_get("company")?;
            sqlx::query("UPDATE contacts SET search_text = ? WHERE id = ?")
                .bind(search_text(
                    &draft.email,
                    first_name.as_deref(),
                    last_name.as_deref(),
                    company.as_deref(),
                ))
                .bind(&id)
                .execute(&mut *conn)
                .await?;
            return Ok(UpsertOutcome::Updated(parse_uuid(&id)?));
        }
    }

    let id = Uuid::new_v4();
    let inserted: Option<String> = sqlx::query_scalar(
        r#"
        INSERT INTO contacts (id, team_id, email, first_name, last_name, phone, company,
                              status, attributes, source, created_at, updated_at, search_text)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (team_id, email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(id.to_string())
    .bind(team_id.to_string())
    .bind(&draft.email)
    .bind(&draft.first_name)
    .bind(&draft.last_name)
    .bind(&draft.phone)
    .bind(&draft.company)
    .bind(draft.status.unwrap_or_default().as_str())
    .bind(&attributes)
    .bind(ContactSource::CsvImport.as_str())
    .bind(&at)
    .bind(&at)
    .bind(search_text(
        &draft.email,
        draft.first_name.as_deref(),
        draft.last_name.as_deref(),
        draft.company.as_deref(),
    ))
    .fetch_optional(&mut *conn)
    .await?;

    Ok(match inserted {
        Some(_) => UpsertOutcome::Created(id),
        None => UpsertOutcome::Skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database, teams};
    use serde_json::json;

    async fn setup() -> (tempfile::TempDir, SqlitePool, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("ahub.db"), 2).await.unwrap();
        let team = teams::create_team(&pool, "Acme").await.unwrap();
        (dir, pool, team.id)
    }

    fn new_contact(email: &str) -> NewContact {
        NewContact {
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_and_rejects_duplicates() {
        let (_dir, pool, team) = setup().await;

        let c = create_contact(&pool, team, new_contact(" Ada@Example.com ")).await.unwrap();
        assert_eq!(c.email, "ada@example.com");
        assert_eq!(c.status, ContactStatus::Subscribed);
        assert_eq!(c.source, ContactSource::Manual);

        let dup = create_contact(&pool, team, new_contact("ADA@example.com")).await;
        assert!(matches!(dup, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_duplicate_of_deleted_contact_suggests_restore() {
        let (_dir, pool, team) = setup().await;
        let c = create_contact(&pool, team, new_contact("ada@example.com")).await.unwrap();
        delete_contact(&pool, team, c.id).await.unwrap();

        match create_contact(&pool, team, new_contact("ada@example.com")).await {
            Err(Error::Conflict(msg)) => assert!(msg.contains("restore")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_email_allowed_in_other_team() {
        let (_dir, pool, team) = setup().await;
        let other = teams::create_team(&pool, "Globex").await.unwrap();

        create_contact(&pool, team, new_contact("ada@example.com")).await.unwrap();
        assert!(create_contact(&pool, other.id, new_contact("ada@example.com")).await.is_ok());
        assert!(get_contact(&pool, other.id, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_attributes_and_blanks_fields() {
        let (_dir, pool, team) = setup().await;
        let mut new = new_contact("ada@example.com");
        new.first_name = Some("Ada".to_string());
        new.attributes = json!({"plan": "pro", "seats": 3}).as_object().unwrap().clone();
        let c = create_contact(&pool, team, new).await.unwrap();

        let patch = ContactPatch {
            first_name: Some("".to_string()),
            attributes: Some(json!({"plan": null, "region": "eu"}).as_object().unwrap().clone()),
            ..Default::default()
        };
        let updated = update_contact(&pool, team, c.id, patch).await.unwrap();

        assert_eq!(updated.first_name, None);
        assert_eq!(updated.attributes.get("plan"), None);
        assert_eq!(updated.attributes["seats"], json!(3));
        assert_eq!(updated.attributes["region"], json!("eu"));

        let reloaded = require_contact(&pool, team, c.id).await.unwrap();
        assert_eq!(reloaded.attributes, updated.attributes);
    }

    #[tokio::test]
    async fn test_update_email_conflict() {
        let (_dir, pool, team) = setup().await;
        create_contact(&pool, team, new_contact("ada@example.com")).await.unwrap();
        let grace = create_contact(&pool, team, new_contact("grace@example.com")).await.unwrap();

        let patch = ContactPatch {
            email: Some("ADA@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            update_contact(&pool, team, grace.id, patch).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_soft_delete_restore_purge() {
        let (_dir, pool, team) = setup().await;
        let c = create_contact(&pool, team, new_contact("ada@example.com")).await.unwrap();

        assert!(matches!(purge_contact(&pool, team, c.id).await, Err(Error::Conflict(_))));

        let deleted = delete_contact(&pool, team, c.id).await.unwrap();
        assert!(deleted.is_deleted());
        // Idempotent
        let again = delete_contact(&pool, team, c.id).await.unwrap();
        assert_eq!(again.deleted_at, deleted.deleted_at);

        let editing = update_contact(&pool, team, c.id, ContactPatch::default()).await;
        assert!(matches!(editing, Err(Error::Conflict(_))));

        let restored = restore_contact(&pool, team, c.id).await.unwrap();
        assert!(!restored.is_deleted());

        delete_contact(&pool, team, c.id).await.unwrap();
        purge_contact(&pool, team, c.id).await.unwrap();
        assert!(get_contact(&pool, team, c.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_delete_and_restore_count_changes_only() {
        let (_dir, pool, team) = setup().await;
        let a = create_contact(&pool, team, new_contact("a@example.com")).await.unwrap();
        let b = create_contact(&pool, team, new_contact("b@example.com")).await.unwrap();
        delete_contact(&pool, team, b.id).await.unwrap();

        let affected = bulk_set_deleted(&pool, team, &[a.id, b.id, Uuid::new_v4()], true)
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let restored = bulk_set_deleted(&pool, team, &[a.id, b.id], false).await.unwrap();
        assert_eq!(restored, 2);
    }

    #[tokio::test]
    async fn test_list_contacts_search_filters_and_sort() {
        let (_dir, pool, team) = setup().await;
        for (email, last, company) in [
            ("ada@example.com", "Lovelace", "Analytical"),
            ("grace@navy.mil", "Hopper", "Navy"),
            ("alan@example.com", "Turing", "Bletchley"),
        ] {
            let mut new = new_contact(email);
            new.last_name = Some(last.to_string());
            new.company = Some(company.to_string());
            create_contact(&pool, team, new).await.unwrap();
        }
        let removed = create_contact(&pool, team, new_contact("gone@example.com")).await.unwrap();
        delete_contact(&pool, team, removed.id).await.unwrap();

        let query = ContactQuery {
            filter: ContactFilter {
                q: Some("EXAMPLE".to_string()),
                ..Default::default()
            },
            sort: ContactSort::LastName,
            page: 1,
            ..Default::default()
        };
        let page = list_contacts(&pool, team, &query).await.unwrap();
        assert_eq!(page.total, 2);
        let lasts: Vec<_> = page.items.iter().map(|c| c.last_name.clone().unwrap()).collect();
        assert_eq!(lasts, vec!["Lovelace", "Turing"]);

        let trash = ContactQuery {
            deleted: DeletedFilter::Only,
            page: 1,
            ..Default::default()
        };
        let page = list_contacts(&pool, team, &trash).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].email, "gone@example.com");

        let by_company = ContactQuery {
            filter: ContactFilter {
                q: Some("navy".to_string()),
                ..Default::default()
            },
            page: 1,
            ..Default::default()
        };
        assert_eq!(list_contacts(&pool, team, &by_company).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_search_escapes_like_wildcards() {
        let (_dir, pool, team) = setup().await;
        create_contact(&pool, team, new_contact("percent@example.com")).await.unwrap();

        let query = ContactQuery {
            filter: ContactFilter {
                q: Some("%".to_string()),
                ..Default::default()
            },
            page: 1,
            ..Default::default()
        };
        assert_eq!(list_contacts(&pool, team, &query).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let (_dir, pool, team) = setup().await;
        let search = |q: &str| ContactQuery {
            filter: ContactFilter {
                q: Some(q.to_string()),
                ..Default::default()
            },
            page: 1,
            ..Default::default()
        };

        let mut anna = new_contact("anna@example.com");
        anna.last_name = Some("Öberg".to_string());
        let anna = create_contact(&pool, team, anna).await.unwrap();
        assert_eq!(list_contacts(&pool, team, &search("öberg")).await.unwrap().total, 1);
        assert_eq!(list_contacts(&pool, team, &search("ÖBERG")).await.unwrap().total, 1);

        let patch = ContactPatch {
            company: Some("Ärla AB".to_string()),
            ..Default::default()
        };
        update_contact(&pool, team, anna.id, patch).await.unwrap();
        assert_eq!(list_contacts(&pool, team, &search("ärla")).await.unwrap().total, 1);
        assert_eq!(list_contacts(&pool, team, &search("öberg")).await.unwrap().total, 1);

        let mut conn = pool.acquire().await.unwrap();
        let draft = ContactDraft {
            email: "anna@example.com".to_string(),
            first_name: Some("Élodie".to_string()),
            ..Default::default()
        };
        upsert_contact(&mut conn, team, &draft, true, now()).await.unwrap();
        drop(conn);
        assert_eq!(list_contacts(&pool, team, &search("ÉLODIE")).await.unwrap().total, 1);
        assert_eq!(list_contacts(&pool, team, &search("ärla")).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_attribute_filter_matches_types() {
        let (_dir, pool, team) = setup().await;
        let mut pro = new_contact("pro@example.com");
        pro.attributes = json!({"plan": "pro", "seats": 5, "trial": false})
            .as_object()
            .unwrap()
            .clone();
        create_contact(&pool, team, pro).await.unwrap();
        create_contact(&pool, team, new_contact("free@example.com")).await.unwrap();

        let query = ContactQuery {
            filter: serde_json::from_value(json!({
                "attributes": {"plan": "pro", "seats": 5, "trial": false}
            }))
            .unwrap(),
            page: 1,
            ..Default::default()
        };
        let page = list_contacts(&pool, team, &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].email, "pro@example.com");
    }

    #[tokio::test]
    async fn test_upsert_creates_updates_and_revives() {
        let (_dir, pool, team) = setup().await;
        let mut existing = new_contact("ada@example.com");
        existing.first_name = Some("Ada".to_string());
        existing.attributes = json!({"plan": "free"}).as_object().unwrap().clone();
        let existing = create_contact(&pool, team, existing).await.unwrap();
        delete_contact(&pool, team, existing.id).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let draft = ContactDraft {
            email: "ada@example.com".to_string(),
            last_name: Some("Lovelace".to_string()),
            attributes: json!({"plan": "pro"}).as_object().unwrap().clone(),
            ..Default::default()
        };
        let outcome = upsert_contact(&mut conn, team, &draft, true, now()).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated(existing.id));

        let fresh = ContactDraft {
            email: "new@example.com".to_string(),
            ..Default::default()
        };
        let created = upsert_contact(&mut conn, team, &fresh, true, now()).await.unwrap();
        assert!(matches!(created, UpsertOutcome::Created(_)));

        let skipped = upsert_contact(&mut conn, team, &fresh, false, now()).await.unwrap();
        assert_eq!(skipped, UpsertOutcome::Skipped);
        drop(conn);

        let ada = require_contact(&pool, team, existing.id).await.unwrap();
        assert!(!ada.is_deleted());
        assert_eq!(ada.first_name.as_deref(), Some("Ada"));
        assert_eq!(ada.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(ada.attributes["plan"], json!("pro"));

        let new = find_by_email(&pool, team, "new@example.com").await.unwrap().unwrap();
        assert_eq!(new.source, ContactSource::CsvImport);
    }

    #[tokio::test]
    async fn test_set_status_by_email() {
        let (_dir, pool, team) = setup().await;
        let c = create_contact(&pool, team, new_contact("ada@example.com")).await.unwrap();

        let id = set_status_by_email(&pool, team, "ada@example.com", ContactStatus::Bounced)
            .await
            .unwrap();
        assert_eq!(id, Some(c.id));
        assert_eq!(
            require_contact(&pool, team, c.id).await.unwrap().status,
            ContactStatus::Bounced
        );

        let missing = set_status_by_email(&pool, team, "nobody@example.com", ContactStatus::Bounced)
            .await
            .unwrap();
        assert_eq!(missing, None);
    }
}
