//! Secret retrieval for plugin credentials.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::SecretError;

#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Secret payload for `secret_id`, scoped to `domain_id`.
    async fn get_secret_data(&self, secret_id: &str, domain_id: &str) -> Result<Map<String, Value>, SecretError>;
}

#[derive(Debug, Clone, Deserialize)]
struct SecretEntry {
    domain_id: String,
    #[serde(default)]
    data: Map<String, Value>,
}

/// Secrets read from a JSON file of the form
/// `{"<secret_id>": {"domain_id": "...", "data": {...}}}`.
///
/// The file is re-read on every lookup so rotated credentials apply to the
/// next task without a restart.
#[derive(Debug, Clone)]
pub struct FileSecretManager {
    path: PathBuf,
}

impl FileSecretManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<HashMap<String, SecretEntry>, SecretError> {
        let source_err = |reason: String| SecretError::Source {
            path: self.path.display().to_string(),
            reason,
        };
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| source_err(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| source_err(e.to_string()))
    }
}

#[async_trait]
impl SecretManager for FileSecretManager {
    async fn get_secret_data(&self, secret_id: &str, domain_id: &str) -> Result<Map<String, Value>, SecretError> {
        let mut secrets = self.load().await?;
        // A secret owned by another domain is indistinguishable from a missing one.
        match secrets.remove(secret_id) {
            Some(entry) if entry.domain_id == domain_id => {
                debug!(secret_id, domain_id, "secret loaded");
                Ok(entry.data)
            }
            _ => Err(SecretError::NotFound(secret_id.to_string())),
        }
    }
}

/// Fixed secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretManager {
    secrets: HashMap<String, SecretEntry>,
}

impl MemorySecretManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret_id: &str, domain_id: &str, data: Map<String, Value>) -> Self {
        self.secrets.insert(
            secret_id.to_string(),
            SecretEntry {
                domain_id: domain_id.to_string(),
                data,
            },
        );
        self
    }
}

#[async_trait]
impl SecretManager for MemorySecretManager {
    async fn get_secret_data(&self, secret_id: &str, domain_id: &str) -> Result<Map<String, Value>, SecretError> {
        self.secrets
            .get(secret_id)
            .filter(|entry| entry.domain_id == domain_id)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| SecretError::NotFound(secret_id.to_string()))
    }
}
