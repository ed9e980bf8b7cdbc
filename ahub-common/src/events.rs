//! In-process event bus
//!
//! Import progress is published here by whichever process runs the pipeline;
//! the API relays it to SSE clients. Events from a separate worker process do
//! not reach the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ImportJob, ImportStatus};

/// Import counters carried by progress and completion events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub total_rows: i64,
    pub created: i64,
    pub updated: i64,
    pub skipped: i64,
    pub failed: i64,
}

impl From<&ImportJob> for ImportCounters {
    fn from(job: &ImportJob) -> Self {
        Self {
            total_rows: job.total_rows,
            created: job.created_count,
            updated: job.updated_count,
            skipped: job.skipped_count,
            failed: job.failed_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppEvent {
    ImportStarted {
        import_id: Uuid,
        team_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Emitted after each committed batch
    ImportProgress {
        import_id: Uuid,
        team_id: Uuid,
        processed_rows: i64,
        counters: ImportCounters,
        timestamp: DateTime<Utc>,
    },
    ImportCompleted {
        import_id: Uuid,
        team_id: Uuid,
        counters: ImportCounters,
        timestamp: DateTime<Utc>,
    },
    ImportFailed {
        import_id: Uuid,
        team_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AppEvent {
    /// Terminal event for a finished job
    pub fn finished(job: &ImportJob) -> Self {
        match job.status {
            ImportStatus::Failed => AppEvent::ImportFailed {
                import_id: job.id,
                team_id: job.team_id,
                error: job.error_message.clone().unwrap_or_default(),
                timestamp: Utc::now(),
            },
            _ => AppEvent::ImportCompleted {
                import_id: job.id,
                team_id: job.team_id,
                counters: ImportCounters::from(job),
                timestamp: Utc::now(),
            },
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            AppEvent::ImportStarted { .. } => "ImportStarted",
            AppEvent::ImportProgress { .. } => "ImportProgress",
            AppEvent::ImportCompleted { .. } => "ImportCompleted",
            AppEvent::ImportFailed { .. } => "ImportFailed",
        }
    }

    pub fn team_id(&self) -> Uuid {
        match self {
            AppEvent::ImportStarted { team_id, .. }
            | AppEvent::ImportProgress { team_id, .. }
            | AppEvent::ImportCompleted { team_id, .. }
            | AppEvent::ImportFailed { team_id, .. } => *team_id,
        }
    }
}

/// Broadcast channel shared by everything in one process
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
    capacity: usize,
}

impl EventBus {
    /// `capacity` events are buffered before slow subscribers start lagging
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Emit, ignoring the case where nobody is listening
    pub fn emit_lossy(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnMapping;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let team_id = Uuid::new_v4();
        bus.emit_lossy(AppEvent::ImportStarted {
            import_id: Uuid::new_v4(),
            team_id,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "ImportStarted");
        assert_eq!(event.team_id(), team_id);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit_lossy(AppEvent::ImportFailed {
            import_id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            error: "boom".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_finished_event_follows_job_status() {
        let mut job = ImportJob::new(Uuid::new_v4(), Uuid::new_v4(), None, ColumnMapping::default(), true);
        job.status = ImportStatus::Completed;
        job.created_count = 3;
        match AppEvent::finished(&job) {
            AppEvent::ImportCompleted { counters, .. } => assert_eq!(counters.created, 3),
            other => panic!("unexpected event {:?}", other),
        }

        job.status = ImportStatus::Failed;
        job.error_message = Some("missing object".to_string());
        let json = serde_json::to_value(AppEvent::finished(&job)).unwrap();
        assert_eq!(json["type"], "ImportFailed");
        assert_eq!(json["error"], "missing object");
    }
}
