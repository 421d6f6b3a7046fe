//! Startup fixture loader for local runs.
//!
//! File layout: `{ "data_sources": [...], "jobs": [...], "job_tasks": [...] }`
//! using the same JSON shapes the API returns. Records are inserted as-is.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use costsync_core::{DataSource, Job, JobTask};
use costsync_store::Stores;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub job_tasks: Vec<JobTask>,
}

pub async fn load(stores: &Stores, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let seed: SeedFile =
        serde_json::from_str(&raw).with_context(|| format!("invalid seed file {}", path.display()))?;
    apply(stores, seed).await
}

pub async fn apply(stores: &Stores, seed: SeedFile) -> anyhow::Result<()> {
    let counts = (seed.data_sources.len(), seed.jobs.len(), seed.job_tasks.len());
    for data_source in seed.data_sources {
        stores.data_sources.create_data_source(data_source).await?;
    }
    for job in seed.jobs {
        stores.jobs.create_job(job).await?;
    }
    for task in seed.job_tasks {
        stores.job_tasks.create_job_task(task).await?;
    }
    info!(
        data_sources = counts.0,
        jobs = counts.1,
        job_tasks = counts.2,
        "seed data loaded"
    );
    Ok(())
}
