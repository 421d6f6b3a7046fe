//! Job Closer: finalize or roll back a job once its last task has ended.
//!
//! The close claim happens at the storage layer, so among concurrent
//! callers exactly one observes `Some(job)` and runs the side effects.
//! Side-effect failures are logged; the job's terminal status is already
//! durable by then.

use std::sync::Arc;

use tracing::{debug, error, info};

use costsync_core::{Job, JobStatus};

use crate::cost_writer::CostWriter;
use crate::data_source::DataSourceManager;
use crate::error::SyncError;
use crate::job_tracker::JobTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Tasks still outstanding, or another call already closed the job.
    Skipped,
    /// Job SUCCESS; `superseded` older records were reconciled away.
    Succeeded { superseded: u64 },
    /// Job ERROR; `deleted` records written by the job were removed.
    RolledBack { deleted: u64 },
    /// Closed in a status that needs no side effects.
    Closed(JobStatus),
}

pub struct JobCloser {
    jobs: Arc<JobTracker>,
    costs: Arc<CostWriter>,
    data_sources: Arc<dyn DataSourceManager>,
}

impl JobCloser {
    pub fn new(jobs: Arc<JobTracker>, costs: Arc<CostWriter>, data_sources: Arc<dyn DataSourceManager>) -> Self {
        Self {
            jobs,
            costs,
            data_sources,
        }
    }

    pub async fn close_job(&self, job_id: &str, domain_id: &str) -> Result<CloseOutcome, SyncError> {
        let job = self.jobs.get_job(job_id, domain_id).await?;
        if job.remained_tasks > 0 {
            debug!(job_id, remained_tasks = job.remained_tasks, "job still has running tasks");
            return Ok(CloseOutcome::Skipped);
        }

        let Some(job) = self.jobs.change_success(&job).await? else {
            debug!(job_id, "job already closed");
            return Ok(CloseOutcome::Skipped);
        };

        match job.status {
            JobStatus::Success => {
                info!(job_id, data_source_id = %job.data_source_id, "job succeeded");
                Ok(self.finalize(&job).await)
            }
            JobStatus::Error => {
                info!(job_id, data_source_id = %job.data_source_id, "job failed, rolling back");
                Ok(self.rollback(&job).await)
            }
            other => {
                info!(job_id, status = %other, "job closed");
                Ok(CloseOutcome::Closed(other))
            }
        }
    }

    async fn finalize(&self, job: &Job) -> CloseOutcome {
        if let Err(e) = self
            .data_sources
            .update_last_synchronized_at(&job.data_source_id, &job.domain_id, job.created_at)
            .await
        {
            error!(job_id = %job.job_id, error = %e, "failed to update last_synchronized_at");
        }

        let Some(since) = job.last_changed_at else {
            debug!(job_id = %job.job_id, "no last_changed_at, skipping reconciliation");
            return CloseOutcome::Succeeded { superseded: 0 };
        };

        let superseded = match self
            .costs
            .delete_superseded_costs(&job.data_source_id, &job.domain_id, &job.job_id, since)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "failed to delete superseded cost data");
                0
            }
        };
        info!(job_id = %job.job_id, %since, superseded, "reconciled changed cost data");
        CloseOutcome::Succeeded { superseded }
    }

    async fn rollback(&self, job: &Job) -> CloseOutcome {
        let deleted = match self
            .costs
            .delete_job_costs(&job.data_source_id, &job.domain_id, &job.job_id)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "failed to roll back cost data");
                0
            }
        };
        info!(job_id = %job.job_id, deleted, "rolled back cost data");
        CloseOutcome::RolledBack { deleted }
    }
}
