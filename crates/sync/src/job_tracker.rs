//! Job Tracker: the parent job's aggregate lifecycle.

use std::sync::Arc;

use tracing::info;

use costsync_core::Job;
use costsync_store::{JobRepository, StoreError};

pub struct JobTracker {
    repo: Arc<dyn JobRepository>,
}

impl JobTracker {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self { repo }
    }

    pub async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        let job = self.repo.create_job(job).await?;
        info!(job_id = %job.job_id, data_source_id = %job.data_source_id, total_tasks = job.total_tasks, "job created");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str, domain_id: &str) -> Result<Job, StoreError> {
        self.repo
            .get_job(job_id, domain_id)
            .await?
            .ok_or_else(|| StoreError::not_found("job", job_id))
    }

    /// Claim the job's finalization. `Some` only for the single caller that
    /// observed `remained_tasks == 0` first; an IN_PROGRESS job comes back
    /// SUCCESS.
    pub async fn change_success(&self, job: &Job) -> Result<Option<Job>, StoreError> {
        self.repo.claim_close(&job.job_id, &job.domain_id).await
    }

    pub async fn change_canceled(&self, job: &Job) -> Result<Job, StoreError> {
        let job = self.repo.cancel_job(&job.job_id, &job.domain_id).await?;
        info!(job_id = %job.job_id, "job canceled");
        Ok(job)
    }
}
