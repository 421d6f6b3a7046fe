use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use costsync_core::DataSource;
use costsync_store::{DataSourceRepository, StoreError};

/// Data source lookups and the two mutations a sync performs.
#[async_trait]
pub trait DataSourceManager: Send + Sync {
    /// NotFound if absent or owned by another domain.
    async fn get_data_source(&self, data_source_id: &str, domain_id: &str) -> Result<DataSource, StoreError>;

    async fn update_last_synchronized_at(
        &self,
        data_source_id: &str,
        domain_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DataSource, StoreError>;

    async fn update_plugin_version(
        &self,
        data_source_id: &str,
        domain_id: &str,
        version: &str,
    ) -> Result<DataSource, StoreError>;
}

/// [`DataSourceManager`] over the local data source repository.
pub struct StoreDataSourceManager {
    repo: Arc<dyn DataSourceRepository>,
}

impl StoreDataSourceManager {
    pub fn new(repo: Arc<dyn DataSourceRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DataSourceManager for StoreDataSourceManager {
    async fn get_data_source(&self, data_source_id: &str, domain_id: &str) -> Result<DataSource, StoreError> {
        self.repo
            .get_data_source(data_source_id, domain_id)
            .await?
            .ok_or_else(|| StoreError::not_found("data source", data_source_id))
    }

    async fn update_last_synchronized_at(
        &self,
        data_source_id: &str,
        domain_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DataSource, StoreError> {
        self.repo
            .update_last_synchronized_at(data_source_id, domain_id, at)
            .await
    }

    async fn update_plugin_version(
        &self,
        data_source_id: &str,
        domain_id: &str,
        version: &str,
    ) -> Result<DataSource, StoreError> {
        self.repo.update_plugin_version(data_source_id, domain_id, version).await
    }
}
