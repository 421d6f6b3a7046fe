use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid status transition for {entity} {id}: {from} -> {to}")]
    InvalidStatus {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown filter key: {0}")]
    UnknownField(String),

    #[error("invalid timestamp '{value}': {reason}")]
    Timestamp { value: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable error label recorded on failed tasks.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStatus { .. } => "ERROR_INVALID_STATUS",
            Self::Validation(_) | Self::UnknownField(_) => "ERROR_INVALID_PARAMETER",
            Self::Timestamp { .. } => "ERROR_INVALID_TIME_FORMAT",
            Self::Serialize(_) => "ERROR_SERIALIZE",
        }
    }
}
