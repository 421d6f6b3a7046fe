//! Repository traits implemented by every store backend.
//!
//! Lifecycle-critical operations (`start_job_task`, `finish_job_task`,
//! `claim_close`) are single atomic steps at the storage layer, so callers
//! never read-then-branch on shared job counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use costsync_core::{
    CostQuery, CostRecord, DataSource, Job, JobProgress, JobTask, TaskOutcome,
};

use crate::error::StoreError;

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: Job) -> Result<Job, StoreError>;

    async fn get_job(&self, job_id: &str, domain_id: &str) -> Result<Option<Job>, StoreError>;

    /// PENDING or IN_PROGRESS → CANCELED. Other statuses are rejected.
    async fn cancel_job(&self, job_id: &str, domain_id: &str) -> Result<Job, StoreError>;

    /// Elect the single close call for a job.
    ///
    /// Atomically: if `remained_tasks == 0` and the job has not been closed,
    /// stamp `finished_at` and move IN_PROGRESS to SUCCESS. Returns the
    /// updated job to the winner and `None` to everyone else.
    async fn claim_close(&self, job_id: &str, domain_id: &str) -> Result<Option<Job>, StoreError>;
}

#[async_trait]
pub trait JobTaskRepository: Send + Sync {
    async fn create_job_task(&self, task: JobTask) -> Result<JobTask, StoreError>;

    async fn get_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<Option<JobTask>, StoreError>;

    /// PENDING → IN_PROGRESS. A PENDING parent job moves to IN_PROGRESS in
    /// the same step.
    async fn start_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<JobTask, StoreError>;

    /// IN_PROGRESS → SUCCESS/ERROR and decrement of the parent job's
    /// `remained_tasks` as one atomic step. An error outcome also moves an
    /// IN_PROGRESS job to ERROR.
    async fn finish_job_task(
        &self,
        job_task_id: &str,
        domain_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<(JobTask, JobProgress), StoreError>;
}

#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    async fn create_data_source(&self, data_source: DataSource) -> Result<DataSource, StoreError>;

    async fn get_data_source(&self, data_source_id: &str, domain_id: &str) -> Result<Option<DataSource>, StoreError>;

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

#[async_trait]
pub trait CostRepository: Send + Sync {
    async fn insert_cost(&self, record: CostRecord) -> Result<CostRecord, StoreError>;

    /// Matching records (paged/sorted per the query) and the unpaged total.
    async fn list_costs(&self, query: &CostQuery) -> Result<(Vec<CostRecord>, u64), StoreError>;

    async fn count_costs(&self, query: &CostQuery) -> Result<u64, StoreError>;

    /// Delete every matching record. An empty filter is rejected.
    async fn delete_costs(&self, query: &CostQuery) -> Result<u64, StoreError>;
}
