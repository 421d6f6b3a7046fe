pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

use std::sync::Arc;

use tracing::info;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use traits::{CostRepository, DataSourceRepository, JobRepository, JobTaskRepository};

/// Every repository, shared behind trait objects.
///
/// Each backend implements all four traits on one value, so the handles
/// below point at the same underlying store.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobRepository>,
    pub job_tasks: Arc<dyn JobTaskRepository>,
    pub data_sources: Arc<dyn DataSourceRepository>,
    pub costs: Arc<dyn CostRepository>,
}

impl Stores {
    fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: JobRepository + JobTaskRepository + DataSourceRepository + CostRepository + 'static,
    {
        Self {
            jobs: backend.clone(),
            job_tasks: backend.clone(),
            data_sources: backend.clone(),
            costs: backend,
        }
    }

    /// Process-local stores. State is lost on restart.
    pub fn memory() -> Self {
        info!("using in-memory store");
        Self::from_backend(Arc::new(MemoryStore::new()))
    }

    /// Wrap an existing in-memory store, e.g. one seeded by a test.
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self::from_backend(store)
    }

    /// Connect to PostgreSQL and apply migrations.
    #[cfg(feature = "postgres")]
    pub async fn postgres(config: &costsync_core::config::PostgresConfig) -> Result<Self, StoreError> {
        let store = PgStore::connect(config).await?;
        Ok(Self::from_backend(Arc::new(store)))
    }
}
