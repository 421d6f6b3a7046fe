//! Queue worker: long-polls task requests and runs each through the
//! orchestrator.
//!
//! A message is acked once its task has run, whatever the task's outcome.
//! It is nacked for redelivery only when the body cannot be parsed or the
//! run failed with a transient store error before the task was claimed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use costsync_core::{RequestContext, TaskRequest};
use costsync_queue::{parse_batch, QueueConsumer, QueueError, QueueMessage};
use costsync_sync::SyncOrchestrator;

const WORKER_NAME: &str = "queue-worker";

/// Back-off after a failed or empty poll.
const IDLE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub received: usize,
    pub acked: usize,
    pub nacked: usize,
}

enum Disposition {
    Ack,
    Nack,
}

pub struct QueueWorker {
    consumer: Arc<dyn QueueConsumer>,
    orchestrator: Arc<SyncOrchestrator>,
    batch_size: u32,
}

impl QueueWorker {
    pub fn new(consumer: Arc<dyn QueueConsumer>, orchestrator: Arc<SyncOrchestrator>, batch_size: u32) -> Self {
        Self {
            consumer,
            orchestrator,
            batch_size: batch_size.max(1),
        }
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(batch_size = self.batch_size, "queue worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.poll_once() => polled,
            };
            match polled {
                Ok(stats) if stats.received > 0 => {
                    debug!(received = stats.received, acked = stats.acked, nacked = stats.nacked, "batch processed");
                }
                Ok(_) => tokio::time::sleep(IDLE_BACKOFF).await,
                Err(e) => {
                    warn!(error = %e, "queue poll failed, retrying in {:?}", IDLE_BACKOFF);
                    tokio::time::sleep(IDLE_BACKOFF).await;
                }
            }
        }
        info!("queue worker stopped");
    }

    /// Receive one batch and run every parsed request concurrently.
    pub async fn poll_once(&self) -> Result<PollStats, QueueError> {
        let messages = self.consumer.poll_batch(self.batch_size).await?;
        let mut stats = PollStats {
            received: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return Ok(stats);
        }

        let (requests, failures) = parse_batch(messages);
        for (message, e) in &failures {
            warn!(message_id = %message.id, attempt = message.attempt_count, error = %e, "unparseable task request");
            self.settle(message, Disposition::Nack, &mut stats).await;
        }

        let runs = requests.into_iter().map(|(message, request)| async move {
            let disposition = self.run_request(&message, request).await;
            (message, disposition)
        });
        for (message, disposition) in join_all(runs).await {
            self.settle(&message, disposition, &mut stats).await;
        }
        Ok(stats)
    }

    async fn run_request(&self, message: &QueueMessage, request: TaskRequest) -> Disposition {
        let ctx = RequestContext::system(request.domain_id, WORKER_NAME);
        let started = Instant::now();
        match self
            .orchestrator
            .get_cost_data(&ctx, request.task_options, &request.job_task_id)
            .await
        {
            Ok(()) => {
                debug!(
                    message_id = %message.id,
                    job_task_id = %request.job_task_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "task request handled"
                );
                Disposition::Ack
            }
            Err(e) if e.is_transient() => {
                warn!(message_id = %message.id, job_task_id = %request.job_task_id, error = %e, "task request failed, will retry");
                Disposition::Nack
            }
            Err(e) => {
                warn!(message_id = %message.id, job_task_id = %request.job_task_id, code = e.code(), error = %e, "task request rejected");
                Disposition::Ack
            }
        }
    }

    async fn settle(&self, message: &QueueMessage, disposition: Disposition, stats: &mut PollStats) {
        let result = match disposition {
            Disposition::Ack => self.consumer.ack(&message.receipt_handle).await.map(|_| stats.acked += 1),
            Disposition::Nack => self.consumer.nack(&message.receipt_handle).await.map(|_| stats.nacked += 1),
        };
        if let Err(e) = result {
            error!(message_id = %message.id, error = %e, "failed to settle message");
        }
    }
}
