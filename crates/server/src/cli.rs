//! Command-line arguments. Every flag can also come from the environment.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Process-local; state is lost on restart.
    Memory,
    /// PostgreSQL from the `PG_*` settings (requires the `postgres` feature).
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// HTTP API only.
    Http,
    /// Queue worker only.
    Queue,
    /// HTTP API and queue worker in one process.
    Both,
}

impl RunMode {
    pub fn serves_http(self) -> bool {
        matches!(self, RunMode::Http | RunMode::Both)
    }

    pub fn runs_worker(self) -> bool {
        matches!(self, RunMode::Queue | RunMode::Both)
    }
}

#[derive(Debug, Parser)]
#[command(name = "costsync", version, about = "Cost data synchronization job runner")]
pub struct CliArgs {
    /// Storage backend for jobs, tasks, data sources and cost records.
    #[arg(long, value_enum, env = "COSTSYNC_STORE", default_value = "memory")]
    pub store: StoreKind,

    /// Which inbound surfaces to run.
    #[arg(long, value_enum, env = "COSTSYNC_MODE", default_value = "http")]
    pub mode: RunMode,

    /// JSON fixture of data sources, jobs and job tasks to load at startup.
    #[arg(long, env = "COSTSYNC_SEED")]
    pub seed: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_memory_http() {
        let args = CliArgs::parse_from(["costsync"]);
        assert_eq!(args.store, StoreKind::Memory);
        assert_eq!(args.mode, RunMode::Http);
        assert!(args.seed.is_none());
    }

    #[test]
    fn both_mode_runs_everything() {
        let args = CliArgs::parse_from(["costsync", "--mode", "both", "--store", "postgres"]);
        assert!(args.mode.serves_http());
        assert!(args.mode.runs_worker());
        assert_eq!(args.store, StoreKind::Postgres);
        assert!(!RunMode::Queue.serves_http());
    }
}
