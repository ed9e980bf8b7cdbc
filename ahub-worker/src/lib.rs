//! ahub-worker library - import queue consumer
//!
//! Receives `ImportMessage`s and drives each job through the import pipeline.
//! Redelivery is left to the queue: a message is deleted once its job is
//! terminal and kept when the job could not be advanced.

use ahub_common::config::QueueConfig;
use ahub_common::import::{run_import, ImportContext};
use ahub_common::models::ImportStatus;
use ahub_common::queue::{JobQueue, QueueMessage};
use ahub_common::Error;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed receive before polling again
pub const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Job reached (or already had) a terminal status; message deleted
    Finished(ImportStatus),
    /// Body was not an `ImportMessage`; message deleted
    Malformed,
    /// No such job for the team; message deleted
    UnknownJob,
    /// Transient failure; message kept for redelivery
    Retry,
}

pub struct Worker {
    ctx: ImportContext,
    queue: Arc<dyn JobQueue>,
    max_messages: u32,
    wait: Duration,
}

impl Worker {
    pub fn new(ctx: ImportContext, queue: Arc<dyn JobQueue>, config: &QueueConfig) -> Self {
        Self {
            ctx,
            queue,
            max_messages: config.max_messages.max(1),
            wait: Duration::from_secs(config.wait_time_secs),
        }
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// A batch already received is finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(max_messages = self.max_messages, wait_secs = self.wait.as_secs(), "Import worker started");

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.max_messages, self.wait) => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(error = %e, "Queue receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_PAUSE) => continue,
                    }
                }
            };

            if messages.is_empty() {
                continue;
            }
            debug!(count = messages.len(), "Received import messages");

            stream::iter(messages)
                .for_each_concurrent(self.max_messages as usize, |message| async move {
                    self.process_message(&message).await;
                })
                .await;
        }

        info!("Import worker stopped");
    }

    /// Run one message and settle it with the queue
    pub async fn process_message(&self, message: &QueueMessage) -> Disposition {
        let disposition = match message.parse() {
            Err(e) => {
                warn!(error = %e, body = %message.body, "Dropping malformed queue message");
                Disposition::Malformed
            }
            Ok(import) => match run_import(&self.ctx, &import).await {
                Ok(job) => Disposition::Finished(job.status),
                Err(Error::NotFound(msg)) => {
                    warn!(import_id = %import.import_id, team_id = %import.team_id, "Dropping message: {}", msg);
                    Disposition::UnknownJob
                }
                Err(e) => {
                    if !e.is_transient() {
                        error!(import_id = %import.import_id, error = %e, "Import could not be advanced");
                    }
                    warn!(import_id = %import.import_id, "Leaving message for redelivery");
                    Disposition::Retry
                }
            },
        };

        if disposition != Disposition::Retry {
            if let Err(e) = self.queue.delete(&message.receipt).await {
                // the job is terminal, so a redelivery is skipped by run_import
                warn!(receipt = %message.receipt, error = %e, "Failed to delete queue message");
            }
        }
        disposition
    }
}
