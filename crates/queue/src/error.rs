//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "ERROR_QUEUE_CONNECTION",
            Self::Parse(_) => "ERROR_QUEUE_PARSE",
            Self::Ack(_) => "ERROR_QUEUE_ACK",
            Self::Provider(_) => "ERROR_QUEUE_PROVIDER",
        }
    }
}
