//! Parse queue message bodies into [`TaskRequest`]s.

use costsync_core::TaskRequest;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Parse one message body.
///
/// Rejects bodies that are not task requests, carry an empty
/// `job_task_id`/`domain_id`, or hold non-object `task_options`.
/// Missing or null options become `{}`.
pub fn parse_message(msg: &QueueMessage) -> Result<TaskRequest, QueueError> {
    serde_json::from_str::<TaskRequest>(&msg.body)
        .map_err(|e| QueueError::Parse(format!("invalid task request in message {}: {}", msg.id, e)))?
        .normalize()
        .map_err(|e| QueueError::Parse(format!("message {}: {}", msg.id, e)))
}

/// Parse a batch, separating good requests from bad messages.
///
/// Returns `(parsed, errors)`; each parsed request keeps its source message
/// so the worker can ack it after the run.
pub fn parse_batch(messages: Vec<QueueMessage>) -> (Vec<(QueueMessage, TaskRequest)>, Vec<(QueueMessage, QueueError)>) {
    let mut parsed = Vec::with_capacity(messages.len());
    let mut errors = Vec::new();

    for msg in messages {
        match parse_message(&msg) {
            Ok(request) => parsed.push((msg, request)),
            Err(e) => errors.push((msg, e)),
        }
    }

    (parsed, errors)
}
