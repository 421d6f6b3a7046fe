//! Sync Orchestrator: runs one job task end to end.
//!
//! 1. Load the task and claim it (IN_PROGRESS). Missing task or job and
//!    illegal transitions are returned to the caller.
//! 2. Resolve the data source, plugin endpoint and secret; open the plugin
//!    stream and persist every row, counting as it goes.
//! 3. Record SUCCESS with the count, or ERROR with the failure message.
//! 4. Run the job close step.
//!
//! Failures in step 2 are contained: they end up on the task, never in the
//! caller's result. Partial writes are left for the close step's rollback.
//! When SUCCESS cannot be recorded the task is recorded as ERROR instead, so
//! the job still counts down and its rows get rolled back.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use costsync_core::config::SyncConfig;
use costsync_core::{parse_timestamp, CoreError, JobStatus, JobTask, NewCost, RequestContext, UpgradeMode};
use costsync_store::{StoreError, Stores};

use crate::closer::JobCloser;
use crate::cost_writer::CostWriter;
use crate::data_source::{DataSourceManager, StoreDataSourceManager};
use crate::error::{IngestError, SyncError};
use crate::job_task_tracker::JobTaskTracker;
use crate::job_tracker::JobTracker;
use crate::plugin::{FetchRequest, PluginManager, RawCostRow};
use crate::secret::SecretManager;

pub struct SyncOrchestrator {
    jobs: Arc<JobTracker>,
    tasks: Arc<JobTaskTracker>,
    costs: Arc<CostWriter>,
    plugins: Arc<dyn PluginManager>,
    secrets: Arc<dyn SecretManager>,
    data_sources: Arc<dyn DataSourceManager>,
    closer: JobCloser,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        jobs: Arc<JobTracker>,
        tasks: Arc<JobTaskTracker>,
        costs: Arc<CostWriter>,
        plugins: Arc<dyn PluginManager>,
        secrets: Arc<dyn SecretManager>,
        data_sources: Arc<dyn DataSourceManager>,
        config: SyncConfig,
    ) -> Self {
        let closer = JobCloser::new(jobs.clone(), costs.clone(), data_sources.clone());
        Self {
            jobs,
            tasks,
            costs,
            plugins,
            secrets,
            data_sources,
            closer,
            config,
        }
    }

    /// Wire trackers, writer and data source manager over one set of stores.
    pub fn from_stores(
        stores: &Stores,
        plugins: Arc<dyn PluginManager>,
        secrets: Arc<dyn SecretManager>,
        config: SyncConfig,
    ) -> Self {
        Self::new(
            Arc::new(JobTracker::new(stores.jobs.clone())),
            Arc::new(JobTaskTracker::new(stores.job_tasks.clone())),
            Arc::new(CostWriter::new(stores.costs.clone())),
            plugins,
            secrets,
            Arc::new(StoreDataSourceManager::new(stores.data_sources.clone())),
            config,
        )
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn tasks(&self) -> &JobTaskTracker {
        &self.tasks
    }

    pub fn closer(&self) -> &JobCloser {
        &self.closer
    }

    /// Run the job task `job_task_id` in the caller's domain.
    ///
    /// Returns once the task is terminal and the close step has run. Errors
    /// only when the task could not be claimed or its outcome not recorded.
    pub async fn get_cost_data(
        &self,
        ctx: &RequestContext,
        task_options: Value,
        job_task_id: &str,
    ) -> Result<(), SyncError> {
        let domain_id = ctx.domain_id.as_str();
        let task = self.tasks.get_job_task(job_task_id, domain_id).await?;
        let job = self.jobs.get_job(&task.job_id, domain_id).await?;
        let task = self.tasks.change_in_progress(&task).await?;

        info!(
            request_id = %ctx.request_id,
            job_task_id,
            job_id = %task.job_id,
            data_source_id = %task.data_source_id,
            "job task started"
        );
        let started = Instant::now();

        let result = if job.status == JobStatus::Canceled {
            Err(IngestError::JobCanceled)
        } else {
            let deadline = self.config.task_timeout();
            tokio::time::timeout(deadline, self.ingest(&task, task_options))
                .await
                .unwrap_or(Err(IngestError::Deadline(self.config.task_timeout_secs)))
        };

        let recorded = match result {
            Ok(count) => match self.tasks.change_success(&task, count).await {
                Ok(progress) => {
                    info!(
                        job_task_id,
                        job_id = %task.job_id,
                        ingested_count = count,
                        remained_tasks = progress.remained_tasks,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "job task succeeded"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(job_task_id, job_id = %task.job_id, error = %e, "failed to record task success");
                    self.record_error(&task, IngestError::Store(e), started).await
                }
            },
            Err(e) => self.record_error(&task, e, started).await,
        };

        // Runs even when recording failed.
        if let Err(e) = self.closer.close_job(&task.job_id, domain_id).await {
            error!(job_id = %task.job_id, error = %e, "failed to close job");
        }
        recorded.map_err(SyncError::from)
    }

    async fn record_error(&self, task: &JobTask, e: IngestError, started: Instant) -> Result<(), StoreError> {
        let progress = self.tasks.change_error(task, &e).await?;
        warn!(
            job_task_id = %task.job_task_id,
            job_id = %task.job_id,
            code = e.code(),
            error = %e,
            remained_tasks = progress.remained_tasks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job task failed"
        );
        Ok(())
    }

    /// Fetch and persist; the row count on full consumption.
    async fn ingest(&self, task: &JobTask, task_options: Value) -> Result<u64, IngestError> {
        let domain_id = task.domain_id.as_str();
        let data_source = self
            .data_sources
            .get_data_source(&task.data_source_id, domain_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    IngestError::DataSourceNotFound(task.data_source_id.clone())
                } else {
                    IngestError::Store(e)
                }
            })?;
        let plugin_info = data_source.plugin_info;

        let resolved = self.plugins.resolve_endpoint(&plugin_info, domain_id).await?;
        if let Some(version) = resolved.updated_version.as_deref() {
            if plugin_info.upgrade_mode == UpgradeMode::Auto && version != plugin_info.version {
                self.data_sources
                    .update_plugin_version(&task.data_source_id, domain_id, version)
                    .await?;
                info!(
                    data_source_id = %task.data_source_id,
                    from = %plugin_info.version,
                    to = version,
                    "plugin version upgraded"
                );
            }
        }

        let secret_data = match plugin_info.secret_id.as_deref().filter(|s| !s.is_empty()) {
            Some(secret_id) => self.secrets.get_secret_data(secret_id, domain_id).await?,
            None => Map::new(),
        };

        self.plugins.initialize(&resolved.endpoint, &plugin_info.options).await?;

        let request = FetchRequest {
            options: plugin_info.options,
            secret_data,
            schema: plugin_info.schema,
            task_options,
        };
        let mut stream = self.plugins.fetch_cost_data(&resolved.endpoint, request).await?;

        let idle = self.config.plugin_idle_timeout();
        let mut count: u64 = 0;
        debug!(job_task_id = %task.job_task_id, endpoint = %resolved.endpoint, "streaming cost data");
        loop {
            let next = tokio::time::timeout(idle, stream.next())
                .await
                .map_err(|_| IngestError::IdleTimeout(self.config.plugin_idle_timeout_secs))?;
            let Some(batch) = next else { break };
            for row in batch?.results {
                count += 1;
                let cost = self.normalize(task, row, count)?;
                self.costs.create_cost(cost).await?;
            }
        }
        Ok(count)
    }

    /// Attach provenance and defaults to a raw row.
    fn normalize(&self, task: &JobTask, row: RawCostRow, index: u64) -> Result<NewCost, IngestError> {
        let invalid = |source: CoreError| IngestError::InvalidRow { row: index, source };
        let billed_at = row
            .billed_at
            .as_deref()
            .ok_or_else(|| invalid(CoreError::Validation("billed_at is required".into())))
            .and_then(|raw| parse_timestamp(raw).map_err(invalid))?;

        Ok(NewCost {
            job_id: task.job_id.clone(),
            job_task_id: task.job_task_id.clone(),
            data_source_id: task.data_source_id.clone(),
            domain_id: task.domain_id.clone(),
            original_cost: row.cost.unwrap_or(0.0),
            original_currency: row
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| self.config.default_currency.clone()),
            usage_quantity: row.usage_quantity,
            provider: row.provider,
            region_code: row.region_code,
            product: row.product,
            account: row.account,
            usage_type: row.usage_type,
            resource: row.resource,
            tags: row.tags,
            additional_info: row.additional_info,
            billed_at,
        })
    }
}
