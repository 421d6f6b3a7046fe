use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Core(#[from] costsync_core::CoreError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Stable error label recorded on failed tasks.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ERROR_NOT_FOUND",
            Self::Core(e) => e.code(),
            Self::Conflict(_) => "ERROR_CONFLICT",
            #[cfg(feature = "postgres")]
            Self::Database(_) | Self::Migrate(_) => "ERROR_DATABASE",
            Self::Other(_) => "ERROR_STORE",
        }
    }
}
