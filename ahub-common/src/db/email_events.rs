//! Email events reported by the provider webhook

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{contacts, ts};
use crate::models::{normalize_email, IncomingEmailEvent};
use crate::{Error, Result};

/// Result of recording one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Stored,
    Duplicate,
}

/// Reject events that reference unknown teams or another team's broadcast
pub async fn check_event(pool: &SqlitePool, event: &IncomingEmailEvent) -> Result<()> {
    if !super::teams::team_exists(pool, event.team_id).await? {
        return Err(Error::NotFound(format!("Team not found: {}", event.team_id)));
    }
    normalize_email(&event.email)?;

    if let Some(broadcast_id) = event.broadcast_id {
        super::broadcasts::get_broadcast(pool, event.team_id, broadcast_id)
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::InvalidInput(format!(
                    "Broadcast {} does not belong to team {}",
                    broadcast_id, event.team_id
                )),
                other => other,
            })?;
    }
    Ok(())
}

/// Store an event and apply its contact status effect
///
/// A `provider_id` already seen for the team is a redelivery: nothing is
/// written and the status effect is not applied again.
pub async fn record_event(
    pool: &SqlitePool,
    event: &IncomingEmailEvent,
    received_at: DateTime<Utc>,
) -> Result<Recorded> {
    let email = normalize_email(&event.email)?;
    let contact_id = contacts::id_by_email(pool, event.team_id, &email).await?;
    let occurred_at = event.occurred_at.unwrap_or(received_at);

    let inserted: Option<String> = sqlx::query_scalar(
        r#"
        INSERT INTO email_events (id, team_id, broadcast_id, contact_id, email, event_type,
                                  provider_id, data, occurred_at, received_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (team_id, provider_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(event.team_id.to_string())
    .bind(event.broadcast_id.map(|id| id.to_string()))
    .bind(contact_id.map(|id| id.to_string()))
    .bind(&email)
    .bind(event.event_type.as_str())
    .bind(&event.provider_id)
    .bind(serde_json::to_string(&event.data)?)
    .bind(ts(&occurred_at))
    .bind(ts(&received_at))
    .fetch_optional(pool)
    .await?;

    if inserted.is_none() {
        return Ok(Recorded::Duplicate);
    }

    if let (Some(status), Some(_)) = (event.event_type.status_effect(), contact_id) {
        contacts::set_status_by_email(pool, event.team_id, &email, status).await?;
        tracing::info!(
            team_id = %event.team_id,
            email = %email,
            status = %status,
            "Contact status changed by email event"
        );
    }

    Ok(Recorded::Stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database, now, teams};
    use crate::models::{ContactStatus, EmailEventType, NewContact};
    use serde_json::Value;

    async fn setup() -> (tempfile::TempDir, SqlitePool, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("ahub.db"), 2).await.unwrap();
        let team = teams::create_team(&pool, "Acme").await.unwrap();
        (dir, pool, team.id)
    }

    fn event(team_id: Uuid, event_type: EmailEventType, email: &str, provider_id: Option<&str>) -> IncomingEmailEvent {
        IncomingEmailEvent {
            event_type,
            email: email.to_string(),
            team_id,
            broadcast_id: None,
            occurred_at: None,
            provider_id: provider_id.map(str::to_string),
            data: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_bounce_sets_contact_status_once() {
        let (_dir, pool, team) = setup().await;
        let c = contacts::create_contact(
            &pool,
            team,
            NewContact {
                email: "ada@example.com".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let bounce = event(team, EmailEventType::Bounced, "ADA@example.com", Some("evt-1"));
        assert_eq!(record_event(&pool, &bounce, now()).await.unwrap(), Recorded::Stored);
        assert_eq!(record_event(&pool, &bounce, now()).await.unwrap(), Recorded::Duplicate);

        let stored = contacts::require_contact(&pool, team, c.id).await.unwrap();
        assert_eq!(stored.status, ContactStatus::Bounced);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_unknown_contact_is_stored_without_link() {
        let (_dir, pool, team) = setup().await;
        let open = event(team, EmailEventType::Opened, "ghost@example.com", None);
        record_event(&pool, &open, now()).await.unwrap();
        record_event(&pool, &open, now()).await.unwrap();

        let rows: Vec<(Option<String>, String)> =
            sqlx::query_as("SELECT contact_id, event_type FROM email_events")
                .fetch_all(&pool)
                .await
                .unwrap();
        // no provider id, so no deduplication
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|(contact, kind)| contact.is_none() && kind == "opened"));
    }

    #[tokio::test]
    async fn test_check_event_rejects_unknown_team_and_foreign_broadcast() {
        let (_dir, pool, team) = setup().await;

        let stray = event(Uuid::new_v4(), EmailEventType::Delivered, "a@example.com", None);
        assert!(matches!(check_event(&pool, &stray).await, Err(Error::NotFound(_))));

        let mut foreign = event(team, EmailEventType::Delivered, "a@example.com", None);
        foreign.broadcast_id = Some(Uuid::new_v4());
        assert!(matches!(check_event(&pool, &foreign).await, Err(Error::InvalidInput(_))));

        let bad_email = event(team, EmailEventType::Delivered, "not-an-email", None);
        assert!(matches!(check_event(&pool, &bad_email).await, Err(Error::InvalidInput(_))));
    }
}
