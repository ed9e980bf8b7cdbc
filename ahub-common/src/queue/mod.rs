//! Job queue carrying import messages from the API to the worker
//!
//! Delivery guarantees come from the queue itself: SQS redelivers a message
//! whose visibility timeout expires before it is deleted.

mod memory;
mod sqs;

pub use memory::MemoryQueue;
pub use sqs::SqsQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{AppConfig, QueueKind};
use crate::Result;

/// Body of an import queue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMessage {
    pub import_id: Uuid,
    pub team_id: Uuid,
}

/// A received message; `receipt` identifies it for deletion
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
}

impl QueueMessage {
    pub fn parse(&self) -> Result<ImportMessage> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, message: &ImportMessage) -> Result<()>;

    /// Wait up to `wait` for at most `max` messages
    async fn receive(&self, max: u32, wait: Duration) -> Result<Vec<QueueMessage>>;

    async fn delete(&self, receipt: &str) -> Result<()>;
}

/// Build the queue selected by `queue.kind`
pub fn build_job_queue(config: &AppConfig) -> Result<Arc<dyn JobQueue>> {
    match config.queue.kind {
        QueueKind::Memory => Ok(Arc::new(MemoryQueue::new())),
        QueueKind::Sqs => Ok(Arc::new(SqsQueue::from_config(config)?)),
    }
}
