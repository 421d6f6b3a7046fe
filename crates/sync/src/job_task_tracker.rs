//! Job Task Tracker: one task's lifecycle and the parent job's countdown.

use std::sync::Arc;

use tracing::debug;

use costsync_core::{JobProgress, JobTask, TaskOutcome};
use costsync_store::{JobTaskRepository, StoreError};

use crate::error::IngestError;

pub struct JobTaskTracker {
    repo: Arc<dyn JobTaskRepository>,
}

impl JobTaskTracker {
    pub fn new(repo: Arc<dyn JobTaskRepository>) -> Self {
        Self { repo }
    }

    pub async fn create_job_task(&self, task: JobTask) -> Result<JobTask, StoreError> {
        self.repo.create_job_task(task).await
    }

    pub async fn get_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<JobTask, StoreError> {
        self.repo
            .get_job_task(job_task_id, domain_id)
            .await?
            .ok_or_else(|| StoreError::not_found("job task", job_task_id))
    }

    pub async fn change_in_progress(&self, task: &JobTask) -> Result<JobTask, StoreError> {
        let task = self.repo.start_job_task(&task.job_task_id, &task.domain_id).await?;
        debug!(job_task_id = %task.job_task_id, job_id = %task.job_id, "job task in progress");
        Ok(task)
    }

    /// SUCCESS with the ingested row count; decrements the parent job.
    pub async fn change_success(&self, task: &JobTask, ingested_count: u64) -> Result<JobProgress, StoreError> {
        let (_, progress) = self
            .repo
            .finish_job_task(
                &task.job_task_id,
                &task.domain_id,
                &TaskOutcome::Success { ingested_count },
            )
            .await?;
        Ok(progress)
    }

    /// ERROR with the failure's message; decrements the parent job and
    /// marks it ERROR.
    pub async fn change_error(&self, task: &JobTask, error: &IngestError) -> Result<JobProgress, StoreError> {
        let outcome = TaskOutcome::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        };
        let (_, progress) = self
            .repo
            .finish_job_task(&task.job_task_id, &task.domain_id, &outcome)
            .await?;
        Ok(progress)
    }
}
