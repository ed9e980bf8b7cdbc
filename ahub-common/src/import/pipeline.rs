//! The import pipeline: object → CSV → drafts → batched upserts

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::mapping::build_draft;
use super::reader::read_csv;
use crate::config::ImportConfig;
use crate::db::contacts::{upsert_contact, ContactDraft, UpsertOutcome};
use crate::db::{imports, lists, now, uploads};
use crate::events::{AppEvent, EventBus, ImportCounters};
use crate::models::{ColumnTarget, ImportJob, ImportStatus, ListKind, RowError};
use crate::queue::ImportMessage;
use crate::storage::ObjectStore;
use crate::{Error, Result};

/// Everything a pipeline run needs
#[derive(Clone)]
pub struct ImportContext {
    pub db: SqlitePool,
    pub store: Arc<dyn ObjectStore>,
    pub events: EventBus,
    pub config: ImportConfig,
}

/// Run the job named by `message` to a terminal state
///
/// Returns the job as stored. Job-level problems (missing object, unusable
/// file, database constraint failures) end in `failed` and are not errors
/// here. An `Err` means the job could not be advanced and should be retried
/// later: unknown job (`NotFound`) or a transient database condition.
pub async fn run_import(ctx: &ImportContext, message: &ImportMessage) -> Result<ImportJob> {
    let mut job = imports::load_import(&ctx.db, message.import_id)
        .await?
        .filter(|job| job.team_id == message.team_id)
        .ok_or_else(|| Error::NotFound(format!("Import not found: {}", message.import_id)))?;

    if job.status.is_terminal() {
        info!(import_id = %job.id, status = job.status.as_str(), "Import already finished, skipping");
        return Ok(job);
    }
    if job.status == ImportStatus::Processing {
        // redelivered after a crash or timeout; upserts make the re-run safe
        warn!(import_id = %job.id, "Import was already processing, running it again");
    }

    job.status = ImportStatus::Processing;
    job.started_at = Some(now());
    job.finished_at = None;
    job.error_message = None;
    reset_counters(&mut job);
    imports::save_progress(&ctx.db, &job).await?;
    ctx.events.emit_lossy(AppEvent::ImportStarted {
        import_id: job.id,
        team_id: job.team_id,
        timestamp: Utc::now(),
    });
    info!(import_id = %job.id, team_id = %job.team_id, upload_id = %job.upload_id, "Import started");

    match process(ctx, &mut job).await {
        Ok(()) => {
            job.status = ImportStatus::Completed;
            info!(
                import_id = %job.id,
                total = job.total_rows,
                created = job.created_count,
                updated = job.updated_count,
                skipped = job.skipped_count,
                failed = job.failed_count,
                "Import completed"
            );
        }
        Err(e) if e.is_transient() => {
            warn!(import_id = %job.id, error = %e, "Import interrupted by a transient error");
            return Err(e);
        }
        Err(e) => {
            warn!(import_id = %job.id, error = %e, "Import failed");
            job.status = ImportStatus::Failed;
            job.error_message = Some(failure_message(&e));
        }
    }

    job.finished_at = Some(now());
    imports::save_progress(&ctx.db, &job).await?;
    ctx.events.emit_lossy(AppEvent::finished(&job));
    Ok(job)
}

fn reset_counters(job: &mut ImportJob) {
    job.total_rows = 0;
    job.created_count = 0;
    job.updated_count = 0;
    job.skipped_count = 0;
    job.failed_count = 0;
    job.errors.clear();
}

fn failure_message(err: &Error) -> String {
    match err {
        Error::NotFound(m) | Error::InvalidInput(m) | Error::Storage(m) => m.clone(),
        other => other.to_string(),
    }
}

fn record_row_error(job: &mut ImportJob, max_row_errors: usize, row: u64, message: String) {
    job.failed_count += 1;
    if job.errors.len() < max_row_errors {
        job.errors.push(RowError { row, message });
    }
}

/// Keep the last occurrence of each email; returns the kept drafts in file order
/// and how many earlier occurrences were dropped
pub fn dedupe_last_wins(drafts: Vec<ContactDraft>) -> (Vec<ContactDraft>, usize) {
    let mut last: HashMap<String, usize> = HashMap::with_capacity(drafts.len());
    for (i, draft) in drafts.iter().enumerate() {
        last.insert(draft.email.clone(), i);
    }

    let total = drafts.len();
    let kept: Vec<ContactDraft> = drafts
        .into_iter()
        .enumerate()
        .filter(|(i, draft)| last.get(&draft.email) == Some(i))
        .map(|(_, draft)| draft)
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

async fn process(ctx: &ImportContext, job: &mut ImportJob) -> Result<()> {
    let upload = uploads::get_upload(&ctx.db, job.team_id, job.upload_id).await?;

    if let Some(list_id) = job.list_id {
        let list = lists::get_live_list(&ctx.db, job.team_id, list_id).await?;
        if list.kind != ListKind::Static {
            return Err(Error::InvalidInput(format!(
                "List {} is dynamic; imports can only attach to static lists",
                list_id
            )));
        }
    }

    let bytes = ctx.store.get_object(&upload.object_key).await.map_err(|e| match e {
        Error::NotFound(_) => Error::NotFound(format!(
            "Uploaded file not found at {}; was the upload completed?",
            upload.object_key
        )),
        other => other,
    })?;
    if bytes.len() as u64 > ctx.config.max_file_bytes {
        return Err(Error::InvalidInput(format!(
            "File is {} bytes; the limit is {} bytes",
            bytes.len(),
            ctx.config.max_file_bytes
        )));
    }

    let (table, undecodable) = read_csv(&bytes, None).map_err(|e| match e {
        Error::Csv(err) => Error::InvalidInput(format!("Unreadable CSV: {}", err)),
        other => other,
    })?;

    let targets = job.mapping.resolve(&table.headers);
    if !targets.contains(&ColumnTarget::Email) {
        return Err(Error::InvalidInput(
            "No CSV column is mapped to email".to_string(),
        ));
    }

    let max_row_errors = ctx.config.max_row_errors;
    job.total_rows = (table.records.len() + undecodable.len()) as i64;
    for (line, message) in undecodable {
        record_row_error(job, max_row_errors, line, message);
    }

    let mut drafts = Vec::with_capacity(table.records.len());
    for record in &table.records {
        if record.is_blank() {
            job.skipped_count += 1;
            continue;
        }
        match build_draft(&targets, &record.fields) {
            Ok(draft) => drafts.push(draft),
            Err(e) => record_row_error(job, max_row_errors, record.line, failure_message(&e)),
        }
    }
    job.errors.sort_by_key(|e| e.row);

    let (drafts, duplicates) = dedupe_last_wins(drafts);
    job.skipped_count += duplicates as i64;
    debug!(
        import_id = %job.id,
        rows = job.total_rows,
        valid = drafts.len(),
        duplicates,
        "CSV parsed"
    );

    let mut processed = job.skipped_count + job.failed_count;
    for batch in drafts.chunks(ctx.config.batch_size.max(1)) {
        commit_batch(&ctx.db, job, batch).await?;
        processed += batch.len() as i64;

        imports::save_progress(&ctx.db, job).await?;
        ctx.events.emit_lossy(AppEvent::ImportProgress {
            import_id: job.id,
            team_id: job.team_id,
            processed_rows: processed,
            counters: ImportCounters::from(&*job),
            timestamp: Utc::now(),
        });
    }

    Ok(())
}

/// Upsert one batch (and list memberships) in a single transaction
async fn commit_batch(pool: &SqlitePool, job: &mut ImportJob, batch: &[ContactDraft]) -> Result<()> {
    let at = now();
    let mut tx = pool.begin().await?;
    let mut touched: Vec<Uuid> = Vec::with_capacity(batch.len());
    let (mut created, mut updated, mut skipped) = (0i64, 0i64, 0i64);

    for draft in batch {
        match upsert_contact(&mut *tx, job.team_id, draft, job.update_existing, at).await? {
            UpsertOutcome::Created(id) => {
                created += 1;
                touched.push(id);
            }
            UpsertOutcome::Updated(id) => {
                updated += 1;
                touched.push(id);
            }
            UpsertOutcome::Skipped => skipped += 1,
        }
    }

    if let Some(list_id) = job.list_id {
        lists::attach_members(&mut *tx, list_id, &touched, &at).await?;
    }
    tx.commit().await?;

    // counters only move once the batch is durable
    job.created_count += created;
    job.updated_count += updated;
    job.skipped_count += skipped;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(email: &str, first: &str) -> ContactDraft {
        ContactDraft {
            email: email.to_string(),
            first_name: Some(first.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_dedupe_keeps_last_occurrence_in_file_order() {
        let (kept, dropped) = dedupe_last_wins(vec![
            draft("a@x.co", "first"),
            draft("b@x.co", "b"),
            draft("a@x.co", "second"),
        ]);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].email, "b@x.co");
        assert_eq!(kept[1].first_name.as_deref(), Some("second"));
    }

    #[test]
    fn test_row_errors_are_capped_but_counted() {
        let mut job = ImportJob::new(Uuid::new_v4(), Uuid::new_v4(), None, Default::default(), true);
        for row in 0..5 {
            record_row_error(&mut job, 3, row + 2, "bad".to_string());
        }
        assert_eq!(job.failed_count, 5);
        assert_eq!(job.errors.len(), 3);
    }
}
