//! The task queue seam: received messages, queue status, and the
//! [`QueueConsumer`] trait the worker polls through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::QueueError;

/// One received task request, still unparsed.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    /// JSON-encoded task request.
    pub body: String,
    /// Handle passed back to `ack`/`nack`; changes on every delivery.
    pub receipt_handle: String,
    pub sent_at: DateTime<Utc>,
    /// 1 on first delivery.
    pub attempt_count: u32,
}

/// Queue backlog as reported on `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub provider: &'static str,
    /// Approximate task requests waiting for delivery.
    pub waiting: Option<u64>,
    /// Approximate requests parked in the dead-letter queue, when one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_lettered: Option<u64>,
}

/// Source of task requests for the queue worker.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Receive up to `max_messages`. May long-poll; empty when idle.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete the message for good.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Make the message visible again for redelivery.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    async fn status(&self) -> Result<QueueStatus, QueueError>;
}
