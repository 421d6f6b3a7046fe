//! Plugin manager seam: endpoint resolution and the lazy cost-data stream.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use costsync_core::PluginInfo;

use crate::error::PluginError;

/// One cost row as reported by a plugin, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawCostRow {
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub usage_quantity: Option<f64>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub region_code: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub usage_type: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub additional_info: Map<String, Value>,
    /// ISO-8601 timestamp; required.
    #[serde(default)]
    pub billed_at: Option<String>,
}

/// One batch from the plugin stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CostBatch {
    #[serde(default)]
    pub results: Vec<RawCostRow>,
}

/// Pull-based stream of batches; dropped early when a task aborts.
pub type CostStream = BoxStream<'static, Result<CostBatch, PluginError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub endpoint: String,
    /// Set when the plugin registry reports a newer version than the data
    /// source records.
    pub updated_version: Option<String>,
}

/// Parameters of one fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchRequest {
    pub options: Map<String, Value>,
    pub secret_data: Map<String, Value>,
    pub schema: Option<String>,
    pub task_options: Value,
}

#[async_trait]
pub trait PluginManager: Send + Sync {
    async fn resolve_endpoint(
        &self,
        plugin_info: &PluginInfo,
        domain_id: &str,
    ) -> Result<ResolvedEndpoint, PluginError>;

    /// Prepare the plugin at `endpoint` before fetching.
    async fn initialize(&self, endpoint: &str, options: &Map<String, Value>) -> Result<(), PluginError>;

    /// Open the cost-data stream. Batches are produced on demand.
    async fn fetch_cost_data(&self, endpoint: &str, request: FetchRequest) -> Result<CostStream, PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_tolerates_sparse_rows() {
        let batch: CostBatch = serde_json::from_str(
            r#"{"results":[{"cost":10,"currency":"USD","billed_at":"2023-01-01T00:00:00Z"},{"billed_at":"2023-01-02"}]}"#,
        )
        .unwrap();
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results[0].cost, Some(10.0));
        assert!(batch.results[1].currency.is_none());
        assert!(batch.results[1].tags.is_empty());
    }

    #[test]
    fn batch_without_results_is_empty() {
        let batch: CostBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.results.is_empty());
    }
}
