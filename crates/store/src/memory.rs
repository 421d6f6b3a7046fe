//! In-memory store backed by insertion-ordered maps.
//!
//! Every repository shares one [`RwLock`], so each trait method is a single
//! critical section. That makes `finish_job_task` (terminal transition plus
//! job decrement) and `claim_close` atomic with respect to concurrent
//! sibling tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::debug;

use costsync_core::{
    CoreError, CostQuery, CostRecord, DataSource, Job, JobProgress, JobStatus, JobTask,
    JobTaskStatus, TaskOutcome,
};

use crate::error::StoreError;
use crate::traits::{CostRepository, DataSourceRepository, JobRepository, JobTaskRepository};

#[derive(Debug, Default)]
struct State {
    jobs: IndexMap<String, Job>,
    job_tasks: IndexMap<String, JobTask>,
    data_sources: IndexMap<String, DataSource>,
    costs: IndexMap<String, CostRecord>,
}

impl State {
    fn job_mut(&mut self, job_id: &str, domain_id: &str) -> Result<&mut Job, StoreError> {
        self.jobs
            .get_mut(job_id)
            .filter(|j| j.domain_id == domain_id)
            .ok_or_else(|| StoreError::not_found("job", job_id))
    }

    fn data_source_mut(&mut self, data_source_id: &str, domain_id: &str) -> Result<&mut DataSource, StoreError> {
        self.data_sources
            .get_mut(data_source_id)
            .filter(|d| d.domain_id == domain_id)
            .ok_or_else(|| StoreError::not_found("data source", data_source_id))
    }

    fn matching_costs<'a>(
        &'a self,
        query: &CostQuery,
    ) -> Result<Vec<&'a CostRecord>, StoreError> {
        query.validate()?;
        let mut out = Vec::new();
        for record in self.costs.values() {
            if query.matches(record)? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

/// Process-local store; the default backend for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.job_id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.job_id)));
        }
        state.jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str, domain_id: &str) -> Result<Option<Job>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .get(job_id)
            .filter(|j| j.domain_id == domain_id)
            .cloned())
    }

    async fn cancel_job(&self, job_id: &str, domain_id: &str) -> Result<Job, StoreError> {
        let mut state = self.state.write().await;
        let job = state.job_mut(job_id, domain_id)?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::InProgress) {
            return Err(CoreError::InvalidStatus {
                entity: "job",
                id: job_id.to_string(),
                from: job.status.to_string(),
                to: JobStatus::Canceled.to_string(),
            }
            .into());
        }
        job.status = JobStatus::Canceled;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn claim_close(&self, job_id: &str, domain_id: &str) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.write().await;
        let job = state.job_mut(job_id, domain_id)?;
        if !job.is_closable() {
            return Ok(None);
        }
        let now = Utc::now();
        if job.status == JobStatus::InProgress {
            job.status = JobStatus::Success;
        }
        job.finished_at = Some(now);
        job.updated_at = now;
        debug!(job_id, status = %job.status, "close claimed");
        Ok(Some(job.clone()))
    }
}

#[async_trait]
impl JobTaskRepository for MemoryStore {
    async fn create_job_task(&self, task: JobTask) -> Result<JobTask, StoreError> {
        let mut state = self.state.write().await;
        if state.job_tasks.contains_key(&task.job_task_id) {
            return Err(StoreError::Conflict(format!(
                "job task {} already exists",
                task.job_task_id
            )));
        }
        state.job_mut(&task.job_id, &task.domain_id)?;
        state.job_tasks.insert(task.job_task_id.clone(), task.clone());
        Ok(task)
    }

    async fn get_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<Option<JobTask>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .job_tasks
            .get(job_task_id)
            .filter(|t| t.domain_id == domain_id)
            .cloned())
    }

    async fn start_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<JobTask, StoreError> {
        let mut state = self.state.write().await;
        let task = state
            .job_tasks
            .get(job_task_id)
            .filter(|t| t.domain_id == domain_id)
            .ok_or_else(|| StoreError::not_found("job task", job_task_id))?;
        task.ensure_transition(JobTaskStatus::InProgress)?;
        let job_id = task.job_id.clone();

        let job = state.job_mut(&job_id, domain_id)?;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::InProgress;
            job.updated_at = Utc::now();
        }

        let task = state
            .job_tasks
            .get_mut(job_task_id)
            .ok_or_else(|| StoreError::not_found("job task", job_task_id))?;
        task.status = JobTaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn finish_job_task(
        &self,
        job_task_id: &str,
        domain_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<(JobTask, JobProgress), StoreError> {
        let mut state = self.state.write().await;

        let task = state
            .job_tasks
            .get(job_task_id)
            .filter(|t| t.domain_id == domain_id)
            .ok_or_else(|| StoreError::not_found("job task", job_task_id))?;
        task.ensure_transition(outcome.status())?;
        let job_id = task.job_id.clone();

        // Validate the job side before mutating anything.
        let job = state.job_mut(&job_id, domain_id)?;
        if job.remained_tasks == 0 {
            return Err(StoreError::Conflict(format!(
                "job {} has no remaining tasks to complete",
                job_id
            )));
        }
        job.remained_tasks -= 1;
        if outcome.is_error() && job.status == JobStatus::InProgress {
            job.status = JobStatus::Error;
        }
        job.updated_at = Utc::now();
        let progress = JobProgress {
            remained_tasks: job.remained_tasks,
            status: job.status,
        };

        let task = state
            .job_tasks
            .get_mut(job_task_id)
            .ok_or_else(|| StoreError::not_found("job task", job_task_id))?;
        task.status = outcome.status();
        task.finished_at = Some(Utc::now());
        match outcome {
            TaskOutcome::Success { ingested_count } => {
                task.ingested_count = *ingested_count;
            }
            TaskOutcome::Error { code, message } => {
                task.error_code = Some(code.clone());
                task.error_message = Some(message.clone());
            }
        }
        Ok((task.clone(), progress))
    }
}

#[async_trait]
impl DataSourceRepository for MemoryStore {
    async fn create_data_source(&self, data_source: DataSource) -> Result<DataSource, StoreError> {
        let mut state = self.state.write().await;
        state
            .data_sources
            .insert(data_source.data_source_id.clone(), data_source.clone());
        Ok(data_source)
    }

    async fn get_data_source(&self, data_source_id: &str, domain_id: &str) -> Result<Option<DataSource>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .data_sources
            .get(data_source_id)
            .filter(|d| d.domain_id == domain_id)
            .cloned())
    }

    async fn update_last_synchronized_at(
        &self,
        data_source_id: &str,
        domain_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DataSource, StoreError> {
        let mut state = self.state.write().await;
        let ds = state.data_source_mut(data_source_id, domain_id)?;
        ds.last_synchronized_at = Some(at);
        Ok(ds.clone())
    }

    async fn update_plugin_version(
        &self,
        data_source_id: &str,
        domain_id: &str,
        version: &str,
    ) -> Result<DataSource, StoreError> {
        let mut state = self.state.write().await;
        let ds = state.data_source_mut(data_source_id, domain_id)?;
        ds.plugin_info.version = version.to_string();
        Ok(ds.clone())
    }
}

#[async_trait]
impl CostRepository for MemoryStore {
    async fn insert_cost(&self, record: CostRecord) -> Result<CostRecord, StoreError> {
        let mut state = self.state.write().await;
        state.costs.insert(record.cost_id.clone(), record.clone());
        Ok(record)
    }

    async fn list_costs(&self, query: &CostQuery) -> Result<(Vec<CostRecord>, u64), StoreError> {
        let state = self.state.read().await;
        let mut matched = state.matching_costs(query)?;
        let total = matched.len() as u64;
        matched.sort_by(|a, b| query.compare(a, b));

        let records = match query.page {
            Some(page) => matched
                .into_iter()
                .skip((page.start - 1) * page.limit)
                .take(page.limit)
                .cloned()
                .collect(),
            None => matched.into_iter().cloned().collect(),
        };
        Ok((records, total))
    }

    async fn count_costs(&self, query: &CostQuery) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state.matching_costs(query)?.len() as u64)
    }

    async fn delete_costs(&self, query: &CostQuery) -> Result<u64, StoreError> {
        if query.filter.is_empty() {
            return Err(CoreError::Validation("refusing to delete costs without a filter".into()).into());
        }
        let mut state = self.state.write().await;
        let ids: Vec<String> = state
            .matching_costs(query)?
            .into_iter()
            .map(|r| r.cost_id.clone())
            .collect();
        for id in &ids {
            state.costs.shift_remove(id);
        }
        Ok(ids.len() as u64)
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use costsync_core::{parse_timestamp, NewCost};

    async fn seeded(total_tasks: u32) -> (MemoryStore, Job, Vec<JobTask>) {
        let store = MemoryStore::new();
        let job = store
            .create_job(Job::new("ds-1", "domain-1", total_tasks, None))
            .await
            .unwrap();
        let mut tasks = Vec::new();
        for i in 0..total_tasks {
            let task = JobTask::new(&job, serde_json::json!({ "month": i }));
            tasks.push(store.create_job_task(task).await.unwrap());
        }
        (store, job, tasks)
    }

    fn cost(job_id: &str, billed_at: &str) -> CostRecord {
        NewCost {
            job_id: job_id.into(),
            job_task_id: "job-task-x".into(),
            data_source_id: "ds-1".into(),
            domain_id: "domain-1".into(),
            original_cost: 1.0,
            original_currency: "USD".into(),
            billed_at: parse_timestamp(billed_at).unwrap(),
            ..Default::default()
        }
        .into_record()
    }

    #[tokio::test]
    async fn start_moves_pending_job_in_progress() {
        let (store, job, tasks) = seeded(1).await;
        let task = store.start_job_task(&tasks[0].job_task_id, "domain-1").await.unwrap();
        assert_eq!(task.status, JobTaskStatus::InProgress);
        assert!(task.started_at.is_some());
        let job = store.get_job(&job.job_id, "domain-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (store, _job, tasks) = seeded(1).await;
        store.start_job_task(&tasks[0].job_task_id, "domain-1").await.unwrap();
        let err = store
            .start_job_task(&tasks[0].job_task_id, "domain-1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Core(CoreError::InvalidStatus { .. })));
    }

    #[tokio::test]
    async fn other_domain_cannot_see_task() {
        let (store, _job, tasks) = seeded(1).await;
        assert!(store
            .get_job_task(&tasks[0].job_task_id, "domain-2")
            .await
            .unwrap()
            .is_none());
        let err = store
            .start_job_task(&tasks[0].job_task_id, "domain-2")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn finish_decrements_and_marks_error() {
        let (store, job, tasks) = seeded(2).await;
        for t in &tasks {
            store.start_job_task(&t.job_task_id, "domain-1").await.unwrap();
        }
        let (_, progress) = store
            .finish_job_task(
                &tasks[0].job_task_id,
                "domain-1",
                &TaskOutcome::Error {
                    code: "ERROR_PLUGIN_DATA".into(),
                    message: "boom".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(progress.remained_tasks, 1);
        assert_eq!(progress.status, JobStatus::Error);

        let (task, progress) = store
            .finish_job_task(
                &tasks[1].job_task_id,
                "domain-1",
                &TaskOutcome::Success { ingested_count: 4 },
            )
            .await
            .unwrap();
        assert_eq!(task.ingested_count, 4);
        assert_eq!(progress.remained_tasks, 0);
        // A later success never clears the job's error.
        assert_eq!(progress.status, JobStatus::Error);

        let job = store.get_job(&job.job_id, "domain-1").await.unwrap().unwrap();
        assert!(job.is_closable());
    }

    #[tokio::test]
    async fn finish_requires_in_progress() {
        let (store, _job, tasks) = seeded(1).await;
        let err = store
            .finish_job_task(
                &tasks[0].job_task_id,
                "domain-1",
                &TaskOutcome::Success { ingested_count: 0 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Core(CoreError::InvalidStatus { .. })));
    }

    #[tokio::test]
    async fn claim_close_elects_one_winner() {
        let (store, job, tasks) = seeded(1).await;
        assert!(store.claim_close(&job.job_id, "domain-1").await.unwrap().is_none());

        store.start_job_task(&tasks[0].job_task_id, "domain-1").await.unwrap();
        store
            .finish_job_task(
                &tasks[0].job_task_id,
                "domain-1",
                &TaskOutcome::Success { ingested_count: 1 },
            )
            .await
            .unwrap();

        let first = store.claim_close(&job.job_id, "domain-1").await.unwrap();
        assert_eq!(first.map(|j| j.status), Some(JobStatus::Success));
        assert!(store.claim_close(&job.job_id, "domain-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_is_one_shot() {
        let (store, job, _tasks) = seeded(1).await;
        let canceled = store.cancel_job(&job.job_id, "domain-1").await.unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);
        assert!(store.cancel_job(&job.job_id, "domain-1").await.is_err());
    }

    #[tokio::test]
    async fn list_costs_pages_and_counts() {
        let store = MemoryStore::new();
        for day in 1..=5 {
            store
                .insert_cost(cost("job-a", &format!("2023-01-0{}T00:00:00Z", day)))
                .await
                .unwrap();
        }
        let query = CostQuery::new()
            .eq("job_id", "job-a")
            .sort_by("billed_at", true)
            .page(2, 2);
        let (records, total) = store.list_costs(&query).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].billed_at, parse_timestamp("2023-01-03T00:00:00Z").unwrap());
    }

    #[tokio::test]
    async fn delete_costs_requires_filter() {
        let store = MemoryStore::new();
        store.insert_cost(cost("job-a", "2023-01-01T00:00:00Z")).await.unwrap();
        store.insert_cost(cost("job-b", "2023-01-01T00:00:00Z")).await.unwrap();

        assert!(store.delete_costs(&CostQuery::new()).await.is_err());
        let deleted = store
            .delete_costs(&CostQuery::new().eq("job_id", "job-a"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count_costs(&CostQuery::new().eq("domain_id", "domain-1")).await.unwrap(), 1);
    }
}
