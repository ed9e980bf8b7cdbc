//! Import pipeline against a real SQLite file and the in-memory object store

use std::sync::Arc;

use ahub_common::config::ImportConfig;
use ahub_common::db::{contacts, imports, init_database, lists, teams, uploads};
use ahub_common::events::{AppEvent, EventBus};
use ahub_common::import::{preview, run_import, ImportContext};
use ahub_common::models::{
    ColumnMapping, ContactStatus, ImportJob, ImportStatus, ListKind, NewContact, NewList, Upload,
    UploadPurpose,
};
use ahub_common::queue::ImportMessage;
use ahub_common::storage::{import_object_key, MemoryObjectStore, ObjectStore};
use ahub_common::Error;
use bytes::Bytes;
use serde_json::json;
use uuid::Uuid;

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: ImportContext,
    team_id: Uuid,
}

async fn fixture(config: ImportConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = init_database(&dir.path().join("ahub.db"), 4).await.unwrap();
    let team = teams::create_team(&db, "Acme").await.unwrap();
    let ctx = ImportContext {
        db,
        store: Arc::new(MemoryObjectStore::new()),
        events: EventBus::new(64),
        config,
    };
    Fixture {
        _dir: dir,
        ctx,
        team_id: team.id,
    }
}

impl Fixture {
    /// Upload `csv` (or only register the slot when `None`) and queue a job for it
    async fn job(&self, csv: Option<&str>, mapping: serde_json::Value, list_id: Option<Uuid>, update_existing: bool) -> ImportMessage {
        let id = Uuid::new_v4();
        let upload = Upload {
            id,
            team_id: self.team_id,
            object_key: import_object_key(self.team_id, id, "contacts.csv"),
            filename: "contacts.csv".to_string(),
            content_type: "text/csv".to_string(),
            purpose: UploadPurpose::ContactImport,
            created_at: ahub_common::db::now(),
        };
        uploads::save_upload(&self.ctx.db, &upload).await.unwrap();
        if let Some(csv) = csv {
            self.ctx
                .store
                .put_object(&upload.object_key, Bytes::from(csv.to_string()), "text/csv")
                .await
                .unwrap();
        }

        let mapping: ColumnMapping = serde_json::from_value(mapping).unwrap();
        let job = ImportJob::new(self.team_id, upload.id, list_id, mapping, update_existing);
        imports::insert_import(&self.ctx.db, &job).await.unwrap();
        ImportMessage {
            import_id: job.id,
            team_id: self.team_id,
        }
    }
}

fn standard_mapping() -> serde_json::Value {
    json!({"email": "email", "first_name": "first_name", "plan": "attribute:plan"})
}

#[tokio::test]
async fn test_skip_existing_when_not_updating() {
    let f = fixture(ImportConfig::default()).await;
    contacts::create_contact(
        &f.ctx.db,
        f.team_id,
        NewContact {
            email: "ada@example.com".to_string(),
            first_name: Some("Ada".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let csv = "email,first_name,plan\nada@example.com,Augusta,pro\nbob@example.com,Bob,free\n";
    let message = f.job(Some(csv), standard_mapping(), None, false).await;
    let job = run_import(&f.ctx, &message).await.unwrap();

    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.created_count, 1);
    assert_eq!(job.updated_count, 0);
    assert_eq!(job.skipped_count, 1);

    let ada = contacts::find_by_email(&f.ctx.db, f.team_id, "ada@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ada.first_name.as_deref(), Some("Ada"));
    assert!(ada.attributes.is_empty());
}

#[tokio::test]
async fn test_import_revives_soft_deleted_contact() {
    let f = fixture(ImportConfig::default()).await;
    let contact = contacts::create_contact(
        &f.ctx.db,
        f.team_id,
        NewContact {
            email: "ada@example.com".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    contacts::delete_contact(&f.ctx.db, f.team_id, contact.id).await.unwrap();

    let message = f
        .job(Some("email,status\nada@example.com,no\n"), json!({"email": "email", "status": "status"}), None, true)
        .await;
    let job = run_import(&f.ctx, &message).await.unwrap();
    assert_eq!(job.updated_count, 1);

    let ada = contacts::require_contact(&f.ctx.db, f.team_id, contact.id).await.unwrap();
    assert!(ada.deleted_at.is_none());
    assert_eq!(ada.status, ContactStatus::Unsubscribed);
}

#[tokio::test]
async fn test_progress_published_per_batch() {
    let f = fixture(ImportConfig {
        batch_size: 2,
        ..Default::default()
    })
    .await;
    let csv = "email\na@x.co\nb@x.co\nc@x.co\nd@x.co\ne@x.co\n";
    let message = f.job(Some(csv), json!({"email": "email"}), None, true).await;

    let mut rx = f.ctx.events.subscribe();
    let job = run_import(&f.ctx, &message).await.unwrap();
    assert_eq!(job.created_count, 5);

    let mut kinds = Vec::new();
    let mut last_processed = 0;
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::ImportProgress { processed_rows, .. } = &event {
            last_processed = *processed_rows;
        }
        kinds.push(event.event_type());
    }
    assert_eq!(
        kinds,
        vec![
            "ImportStarted",
            "ImportProgress",
            "ImportProgress",
            "ImportProgress",
            "ImportCompleted"
        ]
    );
    assert_eq!(last_processed, 5);

    match AppEvent::finished(&job) {
        AppEvent::ImportCompleted { counters, .. } => assert_eq!(counters.created, 5),
        other => panic!("unexpected terminal event {:?}", other),
    }
}

#[tokio::test]
async fn test_finished_job_is_not_rerun() {
    let f = fixture(ImportConfig::default()).await;
    let message = f
        .job(Some("email\na@x.co\n"), json!({"email": "email"}), None, true)
        .await;
    let first = run_import(&f.ctx, &message).await.unwrap();
    assert_eq!(first.status, ImportStatus::Completed);

    let mut rx = f.ctx.events.subscribe();
    let second = run_import(&f.ctx, &message).await.unwrap();
    assert_eq!(second.status, ImportStatus::Completed);
    assert_eq!(second.created_count, 1);
    assert_eq!(second.finished_at, first.finished_at);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_attaches_created_and_updated_contacts_to_list() {
    let f = fixture(ImportConfig::default()).await;
    contacts::create_contact(
        &f.ctx.db,
        f.team_id,
        NewContact {
            email: "old@x.co".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let list = lists::create_list(
        &f.ctx.db,
        f.team_id,
        NewList {
            name: "Imported".to_string(),
            description: None,
            kind: ListKind::Static,
            filter: None,
        },
    )
    .await
    .unwrap();

    let message = f
        .job(Some("email\nold@x.co\nnew@x.co\n"), json!({"email": "email"}), Some(list.id), true)
        .await;
    let job = run_import(&f.ctx, &message).await.unwrap();
    assert_eq!((job.created_count, job.updated_count), (1, 1));

    let list = lists::get_list(&f.ctx.db, f.team_id, list.id).await.unwrap();
    assert_eq!(list.member_count, 2);
}

#[tokio::test]
async fn test_unusable_files_fail_the_job() {
    let f = fixture(ImportConfig {
        max_file_bytes: 64,
        ..Default::default()
    })
    .await;

    let missing = f.job(None, json!({"email": "email"}), None, true).await;
    let job = run_import(&f.ctx, &missing).await.unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert!(job.error_message.unwrap().contains("not found"));

    let no_email_column = f
        .job(Some("Mail,Name\na@x.co,Ada\n"), json!({"email": "email"}), None, true)
        .await;
    let job = run_import(&f.ctx, &no_email_column).await.unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert!(job.error_message.unwrap().contains("email"));

    let big = format!("email\n{}", "someone@example.com\n".repeat(10));
    let too_big = f.job(Some(&big), json!({"email": "email"}), None, true).await;
    let job = run_import(&f.ctx, &too_big).await.unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert!(job.error_message.unwrap().contains("limit"));

    let stored = imports::get_import(&f.ctx.db, f.team_id, too_big.import_id).await.unwrap();
    assert_eq!(stored.status, ImportStatus::Failed);
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn test_repeated_email_header_uses_first_column() {
    let f = fixture(ImportConfig::default()).await;
    let csv = "Email,Name,Email\nada@example.com,Ada,\ngrace@example.com,Grace,\n";
    let suggested = preview(csv.as_bytes(), 0).unwrap().suggested_mapping;

    let message = f
        .job(Some(csv), serde_json::to_value(&suggested).unwrap(), None, true)
        .await;
    let job = run_import(&f.ctx, &message).await.unwrap();

    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.created_count, 2);
    assert_eq!(job.failed_count, 0);
    assert!(job.errors.is_empty());

    let grace = contacts::find_by_email(&f.ctx.db, f.team_id, "grace@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grace.attributes["name"], "Grace");
}

#[tokio::test]
async fn test_message_for_other_team_is_not_found() {
    let f = fixture(ImportConfig::default()).await;
    let message = f
        .job(Some("email\na@x.co\n"), json!({"email": "email"}), None, true)
        .await;

    let forged = ImportMessage {
        import_id: message.import_id,
        team_id: Uuid::new_v4(),
    };
    assert!(matches!(run_import(&f.ctx, &forged).await, Err(Error::NotFound(_))));

    let stored = imports::get_import(&f.ctx.db, f.team_id, message.import_id).await.unwrap();
    assert_eq!(stored.status, ImportStatus::Pending);
}
