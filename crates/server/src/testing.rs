//! Shared fixtures for handler and worker tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};

use costsync_core::config::SyncConfig;
use costsync_core::{DataSource, Job, JobTask, PluginInfo};
use costsync_store::Stores;
use costsync_sync::{
    CostBatch, CostStream, FetchRequest, MemorySecretManager, PluginError, PluginManager, RawCostRow,
    ResolvedEndpoint, SyncOrchestrator,
};

use crate::state::AppState;

pub const DOMAIN: &str = "domain-1";
pub const TOKEN: &str = "test-token-1";

/// Plugin that answers every fetch with two one-row batches.
#[derive(Default)]
pub struct TwoDayPlugin {
    task_options: Mutex<Vec<Value>>,
}

impl TwoDayPlugin {
    /// `task_options` of every fetch so far.
    pub fn seen_task_options(&self) -> Vec<Value> {
        self.task_options.lock().unwrap().clone()
    }
}

fn row(day: u32) -> RawCostRow {
    RawCostRow {
        cost: Some(day as f64),
        currency: Some("USD".into()),
        billed_at: Some(format!("2023-01-{:02}T00:00:00Z", day)),
        ..Default::default()
    }
}

#[async_trait]
impl PluginManager for TwoDayPlugin {
    async fn resolve_endpoint(&self, _info: &PluginInfo, _domain_id: &str) -> Result<ResolvedEndpoint, PluginError> {
        Ok(ResolvedEndpoint {
            endpoint: "memory://plugin".into(),
            updated_version: None,
        })
    }

    async fn initialize(&self, _endpoint: &str, _options: &Map<String, Value>) -> Result<(), PluginError> {
        Ok(())
    }

    async fn fetch_cost_data(&self, _endpoint: &str, request: FetchRequest) -> Result<CostStream, PluginError> {
        self.task_options.lock().unwrap().push(request.task_options);
        let batches = vec![
            Ok(CostBatch { results: vec![row(1)] }),
            Ok(CostBatch { results: vec![row(2)] }),
        ];
        Ok(stream::iter(batches).boxed())
    }
}

pub struct Fixture {
    pub stores: Stores,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub plugin: Arc<TwoDayPlugin>,
    pub data_source: DataSource,
}

impl Fixture {
    pub async fn new() -> Self {
        let stores = Stores::memory();
        let data_source = stores
            .data_sources
            .create_data_source(DataSource::new(
                DOMAIN,
                "billing",
                PluginInfo {
                    plugin_id: "plugin-test".into(),
                    version: "1.0".into(),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let plugin = Arc::new(TwoDayPlugin::default());
        let orchestrator = SyncOrchestrator::from_stores(
            &stores,
            plugin.clone(),
            Arc::new(MemorySecretManager::new()),
            SyncConfig::default(),
        );
        Self {
            stores,
            orchestrator: Arc::new(orchestrator),
            plugin,
            data_source,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.orchestrator.clone(),
            HashMap::from([(TOKEN.to_string(), DOMAIN.to_string())]),
        ))
    }

    pub async fn job_with_task(&self) -> (Job, JobTask) {
        let job = self
            .orchestrator
            .jobs()
            .create_job(Job::new(&self.data_source.data_source_id, DOMAIN, 1, None))
            .await
            .unwrap();
        let task = self
            .orchestrator
            .tasks()
            .create_job_task(JobTask::new(&job, json!({ "month": "2023-01" })))
            .await
            .unwrap();
        (job, task)
    }

    pub async fn task(&self, job_task_id: &str) -> JobTask {
        self.orchestrator.tasks().get_job_task(job_task_id, DOMAIN).await.unwrap()
    }
}
