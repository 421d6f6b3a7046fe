pub mod closer;
pub mod cost_writer;
pub mod data_source;
pub mod error;
pub mod http_plugin;
pub mod job_task_tracker;
pub mod job_tracker;
pub mod orchestrator;
pub mod plugin;
pub mod secret;

pub use closer::{CloseOutcome, JobCloser};
pub use cost_writer::CostWriter;
pub use data_source::{DataSourceManager, StoreDataSourceManager};
pub use error::{IngestError, PluginError, SecretError, SyncError};
pub use http_plugin::HttpPluginManager;
pub use job_task_tracker::JobTaskTracker;
pub use job_tracker::JobTracker;
pub use orchestrator::SyncOrchestrator;
pub use plugin::{CostBatch, CostStream, FetchRequest, PluginManager, RawCostRow, ResolvedEndpoint};
pub use secret::{FileSecretManager, MemorySecretManager, SecretManager};
