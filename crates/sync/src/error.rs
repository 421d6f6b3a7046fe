use thiserror::Error;

use costsync_core::CoreError;
use costsync_store::StoreError;

/// Failures talking to or decoding a cost plugin.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin {plugin_id} has no endpoint configured")]
    NoEndpoint { plugin_id: String },

    #[error("plugin connection failed ({endpoint}): {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("plugin returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("plugin stream interrupted: {0}")]
    Interrupted(String),

    #[error("plugin data error: {0}")]
    Data(String),
}

impl PluginError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Data(_) => "ERROR_PLUGIN_DATA",
            _ => "ERROR_PLUGIN_CONNECTION",
        }
    }
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("failed to read secrets from {path}: {reason}")]
    Source { path: String, reason: String },
}

impl SecretError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ERROR_SECRET_NOT_FOUND",
            Self::Source { .. } => "ERROR_SECRET_SOURCE",
        }
    }
}

/// Why a task's fetch/persist run failed. Recorded on the task, never
/// returned to the caller.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("invalid cost row #{row}: {source}")]
    InvalidRow { row: u64, source: CoreError },

    #[error("plugin sent no data for {0}s")]
    IdleTimeout(u64),

    #[error("task exceeded its {0}s deadline")]
    Deadline(u64),

    #[error("job canceled")]
    JobCanceled,
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Plugin(e) => e.code(),
            Self::Secret(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::DataSourceNotFound(_) => "ERROR_NOT_FOUND",
            Self::InvalidRow { source, .. } => source.code(),
            Self::IdleTimeout(_) | Self::Deadline(_) => "ERROR_TIMEOUT",
            Self::JobCanceled => "ERROR_JOB_CANCELED",
        }
    }
}

/// Errors surfaced to the caller of a task run: the task could not be
/// claimed or its outcome could not be recorded.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Rejected(CoreError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::Core(core) => Self::Rejected(core),
            other => Self::Store(other),
        }
    }
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ERROR_NOT_FOUND",
            Self::Rejected(e) => e.code(),
            Self::Store(e) => e.code(),
        }
    }

    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Rejected(_) => 400,
            Self::Store(StoreError::Conflict(_)) => 409,
            Self::Store(_) => 500,
        }
    }

    /// Whether redelivering the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if !matches!(e, StoreError::Conflict(_)))
    }
}
