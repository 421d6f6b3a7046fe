#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use costsync_core::config::SyncConfig;
use costsync_core::{
    CostQuery, CostRecord, DataSource, Job, JobProgress, JobTask, PluginInfo, RequestContext, TaskOutcome,
};
use costsync_store::{JobTaskRepository, StoreError, Stores};
use costsync_sync::{
    CostBatch, CostStream, CostWriter, DataSourceManager, FetchRequest, JobTaskTracker, JobTracker,
    MemorySecretManager, PluginError, PluginManager, RawCostRow, ResolvedEndpoint,
    StoreDataSourceManager, SyncOrchestrator,
};

pub const DOMAIN: &str = "domain-1";

#[derive(Debug, Clone)]
pub enum Step {
    Batch(Vec<RawCostRow>),
    Fail(String),
    /// Never yields.
    Stall,
    /// Yields an empty batch after a pause.
    Delay(Duration),
}

/// Plugin that replays a fixed script on every fetch.
pub struct ScriptedPlugin {
    steps: Vec<Step>,
    updated_version: Option<String>,
    pub fetches: AtomicUsize,
    pub last_request: Mutex<Option<FetchRequest>>,
}

impl ScriptedPlugin {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            updated_version: None,
            fetches: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn reporting_version(mut self, version: &str) -> Self {
        self.updated_version = Some(version.to_string());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<FetchRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl PluginManager for ScriptedPlugin {
    async fn resolve_endpoint(
        &self,
        _plugin_info: &PluginInfo,
        _domain_id: &str,
    ) -> Result<ResolvedEndpoint, PluginError> {
        Ok(ResolvedEndpoint {
            endpoint: "http://plugin.test".into(),
            updated_version: self.updated_version.clone(),
        })
    }

    async fn initialize(&self, _endpoint: &str, _options: &Map<String, Value>) -> Result<(), PluginError> {
        Ok(())
    }

    async fn fetch_cost_data(&self, _endpoint: &str, request: FetchRequest) -> Result<CostStream, PluginError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        let steps = self.steps.clone();
        Ok(stream::iter(steps)
            .then(|step| async move {
                match step {
                    Step::Batch(results) => Ok(CostBatch { results }),
                    Step::Fail(message) => Err(PluginError::Data(message)),
                    Step::Stall => futures::future::pending().await,
                    Step::Delay(pause) => {
                        tokio::time::sleep(pause).await;
                        Ok(CostBatch::default())
                    }
                }
            })
            .boxed())
    }
}

/// Data source manager that counts finalize writes.
pub struct CountingDataSources {
    inner: StoreDataSourceManager,
    pub last_sync_updates: AtomicUsize,
}

#[async_trait]
impl DataSourceManager for CountingDataSources {
    async fn get_data_source(&self, data_source_id: &str, domain_id: &str) -> Result<DataSource, StoreError> {
        self.inner.get_data_source(data_source_id, domain_id).await
    }

    async fn update_last_synchronized_at(
        &self,
        data_source_id: &str,
        domain_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DataSource, StoreError> {
        self.last_sync_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_last_synchronized_at(data_source_id, domain_id, at).await
    }

    async fn update_plugin_version(
        &self,
        data_source_id: &str,
        domain_id: &str,
        version: &str,
    ) -> Result<DataSource, StoreError> {
        self.inner.update_plugin_version(data_source_id, domain_id, version).await
    }
}

/// Job task repository whose first `failures` terminal transitions fail
/// without touching state.
pub struct FlakyJobTasks {
    inner: Arc<dyn JobTaskRepository>,
    failures: AtomicUsize,
}

impl FlakyJobTasks {
    pub fn new(inner: Arc<dyn JobTaskRepository>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl JobTaskRepository for FlakyJobTasks {
    async fn create_job_task(&self, task: JobTask) -> Result<JobTask, StoreError> {
        self.inner.create_job_task(task).await
    }

    async fn get_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<Option<JobTask>, StoreError> {
        self.inner.get_job_task(job_task_id, domain_id).await
    }

    async fn start_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<JobTask, StoreError> {
        self.inner.start_job_task(job_task_id, domain_id).await
    }

    async fn finish_job_task(
        &self,
        job_task_id: &str,
        domain_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<(JobTask, JobProgress), StoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Other("connection reset".into()));
        }
        self.inner.finish_job_task(job_task_id, domain_id, outcome).await
    }
}

pub fn row(cost: f64, currency: &str, billed_at: &str) -> RawCostRow {
    RawCostRow {
        cost: Some(cost),
        currency: Some(currency.to_string()),
        billed_at: Some(billed_at.to_string()),
        ..Default::default()
    }
}

pub fn plugin_info() -> PluginInfo {
    PluginInfo {
        plugin_id: "plugin-aws-cost".into(),
        version: "1.0.0".into(),
        ..Default::default()
    }
}

pub struct Harness {
    pub stores: Stores,
    pub plugin: Arc<ScriptedPlugin>,
    pub data_sources: Arc<CountingDataSources>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub data_source: DataSource,
}

impl Harness {
    pub async fn new(plugin: ScriptedPlugin) -> Self {
        Self::with(plugin, plugin_info(), MemorySecretManager::new(), SyncConfig::default()).await
    }

    pub async fn with(
        plugin: ScriptedPlugin,
        info: PluginInfo,
        secrets: MemorySecretManager,
        config: SyncConfig,
    ) -> Self {
        Self::build(plugin, info, secrets, config, 0).await
    }

    /// Harness whose first `failures` task outcome writes fail.
    pub async fn with_failing_finishes(plugin: ScriptedPlugin, failures: usize) -> Self {
        Self::build(plugin, plugin_info(), MemorySecretManager::new(), SyncConfig::default(), failures).await
    }

    async fn build(
        plugin: ScriptedPlugin,
        info: PluginInfo,
        secrets: MemorySecretManager,
        config: SyncConfig,
        finish_failures: usize,
    ) -> Self {
        let stores = Stores::memory();
        let data_source = stores
            .data_sources
            .create_data_source(DataSource::new(DOMAIN, "aws billing", info))
            .await
            .unwrap();

        let plugin = Arc::new(plugin);
        let data_sources = Arc::new(CountingDataSources {
            inner: StoreDataSourceManager::new(stores.data_sources.clone()),
            last_sync_updates: AtomicUsize::new(0),
        });
        let orchestrator = SyncOrchestrator::new(
            Arc::new(JobTracker::new(stores.jobs.clone())),
            Arc::new(JobTaskTracker::new(Arc::new(FlakyJobTasks::new(
                stores.job_tasks.clone(),
                finish_failures,
            )))),
            Arc::new(CostWriter::new(stores.costs.clone())),
            plugin.clone(),
            Arc::new(secrets),
            data_sources.clone(),
            config,
        );

        Self {
            stores,
            plugin,
            data_sources,
            orchestrator: Arc::new(orchestrator),
            data_source,
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::system(DOMAIN, "sync-test")
    }

    pub async fn create_job(&self, tasks: u32, last_changed_at: Option<DateTime<Utc>>) -> (Job, Vec<JobTask>) {
        let job = self
            .orchestrator
            .jobs()
            .create_job(Job::new(&self.data_source.data_source_id, DOMAIN, tasks, last_changed_at))
            .await
            .unwrap();
        let mut created = Vec::new();
        for i in 0..tasks {
            let task = self
                .orchestrator
                .tasks()
                .create_job_task(JobTask::new(&job, serde_json::json!({ "part": i })))
                .await
                .unwrap();
            created.push(task);
        }
        (job, created)
    }

    pub async fn run(&self, task: &JobTask) {
        self.orchestrator
            .get_cost_data(&self.ctx(), task.task_options.clone(), &task.job_task_id)
            .await
            .unwrap();
    }

    pub async fn job(&self, job_id: &str) -> Job {
        self.orchestrator.jobs().get_job(job_id, DOMAIN).await.unwrap()
    }

    pub async fn task(&self, job_task_id: &str) -> JobTask {
        self.orchestrator.tasks().get_job_task(job_task_id, DOMAIN).await.unwrap()
    }

    pub async fn costs_of(&self, job_id: &str) -> Vec<CostRecord> {
        let query = CostQuery::new().eq("job_id", job_id).sort_by("billed_at", false);
        self.stores.costs.list_costs(&query).await.unwrap().0
    }

    pub fn last_sync_updates(&self) -> usize {
        self.data_sources.last_sync_updates.load(Ordering::SeqCst)
    }
}
