use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::{ImportMessage, JobQueue, QueueMessage};
use crate::Result;

/// In-process queue. Messages leave the queue on receive; there is no redelivery.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }

    /// Enqueue a raw body (lets tests inject malformed messages)
    pub async fn push_raw(&self, body: String) {
        self.messages.lock().await.push_back(body);
        self.notify.notify_one();
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn send(&self, message: &ImportMessage) -> Result<()> {
        self.push_raw(serde_json::to_string(message)?).await;
        Ok(())
    }

    async fn receive(&self, max: u32, wait: Duration) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut messages = self.messages.lock().await;
                if !messages.is_empty() {
                    let n = messages.len().min(max.max(1) as usize);
                    return Ok(messages
                        .drain(..n)
                        .map(|body| QueueMessage {
                            receipt: Uuid::new_v4().to_string(),
                            body,
                        })
                        .collect());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(remaining, self.notify.notified()).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete(&self, _receipt: &str) -> Result<()> {
        Ok(())
    }
}
