//! In-process queue for local runs and worker tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::consumer::{QueueConsumer, QueueMessage, QueueStatus};
use crate::error::QueueError;

#[derive(Debug, Default)]
struct Inner {
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<String, QueueMessage>,
    acked: Vec<String>,
    next_id: u64,
}

/// FIFO queue with SQS-like receipt handles. Never blocks on poll.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw body; returns the message id.
    pub async fn send(&self, body: impl Into<String>) -> String {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("msg-{}", inner.next_id);
        inner.ready.push_back(QueueMessage {
            id: id.clone(),
            body: body.into(),
            receipt_handle: String::new(),
            sent_at: Utc::now(),
            attempt_count: 0,
        });
        id
    }

    /// Ids of acknowledged messages, in ack order.
    pub async fn acked(&self) -> Vec<String> {
        self.inner.lock().await.acked.clone()
    }

    /// Messages waiting for delivery.
    pub async fn pending(&self) -> usize {
        self.inner.lock().await.ready.len()
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let mut inner = self.inner.lock().await;
        let mut batch = Vec::new();
        while batch.len() < max_messages as usize {
            let Some(mut msg) = inner.ready.pop_front() else {
                break;
            };
            msg.attempt_count += 1;
            msg.receipt_handle = format!("{}#{}", msg.id, msg.attempt_count);
            inner.in_flight.insert(msg.receipt_handle.clone(), msg.clone());
            batch.push(msg);
        }
        Ok(batch)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let msg = inner
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {receipt_handle}")))?;
        inner.acked.push(msg.id);
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let msg = inner
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::Provider(format!("unknown receipt handle {receipt_handle}")))?;
        inner.ready.push_back(msg);
        Ok(())
    }

    async fn status(&self) -> Result<QueueStatus, QueueError> {
        Ok(QueueStatus {
            provider: "memory",
            waiting: Some(self.pending().await as u64),
            dead_lettered: None,
        })
    }
}
