//! Cost Record Writer: validation and persistence of normalized cost rows,
//! plus the bulk deletions used by rollback and reconciliation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use costsync_core::{CostQuery, CostRecord, NewCost};
use costsync_store::{CostRepository, StoreError};

pub struct CostWriter {
    repo: Arc<dyn CostRepository>,
}

impl CostWriter {
    pub fn new(repo: Arc<dyn CostRepository>) -> Self {
        Self { repo }
    }

    /// Validate and persist one record under a generated id.
    pub async fn create_cost(&self, cost: NewCost) -> Result<CostRecord, StoreError> {
        cost.validate()?;
        self.repo.insert_cost(cost.into_record()).await
    }

    /// Every record written by `job_id` for the data source.
    pub async fn filter_costs(
        &self,
        data_source_id: &str,
        domain_id: &str,
        job_id: &str,
    ) -> Result<Vec<CostRecord>, StoreError> {
        let (records, _) = self
            .repo
            .list_costs(&job_costs_query(data_source_id, domain_id, job_id))
            .await?;
        Ok(records)
    }

    pub async fn list_costs(&self, query: &CostQuery) -> Result<(Vec<CostRecord>, u64), StoreError> {
        self.repo.list_costs(query).await
    }

    pub async fn delete_costs(&self, query: &CostQuery) -> Result<u64, StoreError> {
        self.repo.delete_costs(query).await
    }

    /// Rollback: delete everything `job_id` wrote for the data source.
    pub async fn delete_job_costs(&self, data_source_id: &str, domain_id: &str, job_id: &str) -> Result<u64, StoreError> {
        let deleted = self
            .repo
            .delete_costs(&job_costs_query(data_source_id, domain_id, job_id))
            .await?;
        debug!(job_id, deleted, "deleted cost data created by job");
        Ok(deleted)
    }

    /// Reconciliation: delete records of other jobs billed at or after
    /// `since`, which the job `job_id` has re-ingested.
    pub async fn delete_superseded_costs(
        &self,
        data_source_id: &str,
        domain_id: &str,
        job_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let query = CostQuery::new()
            .gte("billed_at", since)
            .eq("data_source_id", data_source_id)
            .eq("domain_id", domain_id)
            .not("job_id", job_id);
        self.repo.delete_costs(&query).await
    }
}

fn job_costs_query(data_source_id: &str, domain_id: &str, job_id: &str) -> CostQuery {
    CostQuery::new()
        .eq("data_source_id", data_source_id)
        .eq("domain_id", domain_id)
        .eq("job_id", job_id)
}
