//! Domain records for cost synchronization: jobs, job tasks, data sources
//! and normalized cost records.
//!
//! Status enums carry their own transition rules so every store backend
//! enforces the same lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Generate a prefixed resource id, e.g. `job-3f2a9c...`.
pub fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Parse an ISO-8601 / RFC 3339 timestamp into UTC.
///
/// Accepts a trailing `Z`, explicit offsets, and naive date-times
/// (`2023-01-01T00:00:00`), which are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CoreError> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CoreError::Timestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

// ── Job ───────────────────────────────────────────────────────

/// Aggregate status of a synchronization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Success,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Success => "SUCCESS",
            JobStatus::Error => "ERROR",
            JobStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error | JobStatus::Canceled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "SUCCESS" => Ok(JobStatus::Success),
            "ERROR" => Ok(JobStatus::Error),
            "CANCELED" => Ok(JobStatus::Canceled),
            other => Err(CoreError::Validation(format!("unknown job status '{}'", other))),
        }
    }
}

/// One synchronization run for one data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub data_source_id: String,
    pub domain_id: String,
    pub status: JobStatus,
    pub total_tasks: u32,
    pub remained_tasks: u32,
    /// High-water mark of the previous successful sync, if any.
    pub last_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, by the close call that finalizes the job.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A new PENDING job expecting `total_tasks` task completions.
    pub fn new(
        data_source_id: impl Into<String>,
        domain_id: impl Into<String>,
        total_tasks: u32,
        last_changed_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: generate_id("job"),
            data_source_id: data_source_id.into(),
            domain_id: domain_id.into(),
            status: JobStatus::Pending,
            total_tasks,
            remained_tasks: total_tasks,
            last_changed_at,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Whether the close step may still claim this job.
    pub fn is_closable(&self) -> bool {
        self.remained_tasks == 0 && self.finished_at.is_none()
    }
}

/// Job state observed right after a task's terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub remained_tasks: u32,
    pub status: JobStatus,
}

// ── JobTask ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobTaskStatus {
    Pending,
    InProgress,
    Success,
    Error,
}

impl JobTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobTaskStatus::Pending => "PENDING",
            JobTaskStatus::InProgress => "IN_PROGRESS",
            JobTaskStatus::Success => "SUCCESS",
            JobTaskStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobTaskStatus::Success | JobTaskStatus::Error)
    }

    /// PENDING → IN_PROGRESS → {SUCCESS, ERROR}; terminal states are final.
    pub fn can_transition_to(&self, next: JobTaskStatus) -> bool {
        matches!(
            (self, next),
            (JobTaskStatus::Pending, JobTaskStatus::InProgress)
                | (JobTaskStatus::InProgress, JobTaskStatus::Success)
                | (JobTaskStatus::InProgress, JobTaskStatus::Error)
        )
    }
}

impl fmt::Display for JobTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobTaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobTaskStatus::Pending),
            "IN_PROGRESS" => Ok(JobTaskStatus::InProgress),
            "SUCCESS" => Ok(JobTaskStatus::Success),
            "ERROR" => Ok(JobTaskStatus::Error),
            other => Err(CoreError::Validation(format!("unknown job task status '{}'", other))),
        }
    }
}

/// One unit of fetch work within a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobTask {
    pub job_task_id: String,
    pub job_id: String,
    pub data_source_id: String,
    pub domain_id: String,
    /// Opaque parameters handed to the plugin.
    pub task_options: serde_json::Value,
    pub status: JobTaskStatus,
    pub ingested_count: u64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobTask {
    pub fn new(job: &Job, task_options: serde_json::Value) -> Self {
        Self {
            job_task_id: generate_id("job-task"),
            job_id: job.job_id.clone(),
            data_source_id: job.data_source_id.clone(),
            domain_id: job.domain_id.clone(),
            task_options,
            status: JobTaskStatus::Pending,
            ingested_count: 0,
            error_code: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Check a transition against the lifecycle rules.
    pub fn ensure_transition(&self, next: JobTaskStatus) -> Result<(), CoreError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidStatus {
                entity: "job task",
                id: self.job_task_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }
}

/// How a task ended, as recorded by its terminal transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success { ingested_count: u64 },
    Error { code: String, message: String },
}

impl TaskOutcome {
    pub fn status(&self) -> JobTaskStatus {
        match self {
            TaskOutcome::Success { .. } => JobTaskStatus::Success,
            TaskOutcome::Error { .. } => JobTaskStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaskOutcome::Error { .. })
    }
}

/// Inbound request to run one job task, as carried by HTTP and queue bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    #[serde(default)]
    pub task_options: serde_json::Value,
    pub job_task_id: String,
    pub domain_id: String,
}

impl TaskRequest {
    /// Reject blank ids and non-object options; a null or missing
    /// `task_options` becomes `{}`.
    pub fn normalize(mut self) -> Result<Self, CoreError> {
        if self.job_task_id.trim().is_empty() || self.domain_id.trim().is_empty() {
            return Err(CoreError::Validation("job_task_id and domain_id are required".into()));
        }
        match self.task_options {
            serde_json::Value::Null => self.task_options = serde_json::Value::Object(Default::default()),
            serde_json::Value::Object(_) => {}
            _ => return Err(CoreError::Validation("task_options must be an object".into())),
        }
        Ok(self)
    }
}

// ── DataSource ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeMode {
    #[default]
    Auto,
    Manual,
}

/// Plugin descriptor of a data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PluginInfo {
    pub plugin_id: String,
    pub version: String,
    /// Explicit plugin endpoint; resolved by the plugin manager when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub upgrade_mode: UpgradeMode,
    #[serde(default)]
    pub secret_id: Option<String>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceState {
    #[default]
    Enabled,
    Disabled,
}

/// Configured external billing connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub data_source_id: String,
    pub domain_id: String,
    pub name: String,
    pub state: DataSourceState,
    pub plugin_info: PluginInfo,
    pub last_synchronized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DataSource {
    pub fn new(domain_id: impl Into<String>, name: impl Into<String>, plugin_info: PluginInfo) -> Self {
        Self {
            data_source_id: generate_id("ds"),
            domain_id: domain_id.into(),
            name: name.into(),
            state: DataSourceState::Enabled,
            plugin_info,
            last_synchronized_at: None,
            created_at: Utc::now(),
        }
    }
}

// ── CostRecord ────────────────────────────────────────────────

/// A normalized cost line item, before an id is assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewCost {
    pub job_id: String,
    pub job_task_id: String,
    pub data_source_id: String,
    pub domain_id: String,
    pub original_cost: f64,
    pub original_currency: String,
    pub usage_quantity: Option<f64>,
    pub provider: Option<String>,
    pub region_code: Option<String>,
    pub product: Option<String>,
    pub account: Option<String>,
    pub usage_type: Option<String>,
    pub resource: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub additional_info: serde_json::Map<String, serde_json::Value>,
    pub billed_at: DateTime<Utc>,
}

impl NewCost {
    /// Reject records missing provenance or carrying unusable amounts.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("job_id", &self.job_id),
            ("job_task_id", &self.job_task_id),
            ("data_source_id", &self.data_source_id),
            ("domain_id", &self.domain_id),
            ("original_currency", &self.original_currency),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("required parameter '{}' is empty", name)));
            }
        }
        if !self.original_cost.is_finite() {
            return Err(CoreError::Validation(format!(
                "original_cost must be a finite number, got {}",
                self.original_cost
            )));
        }
        if let Some(q) = self.usage_quantity {
            if !q.is_finite() {
                return Err(CoreError::Validation("usage_quantity must be a finite number".into()));
            }
        }
        Ok(())
    }

    /// Attach a generated id and creation time.
    pub fn into_record(self) -> CostRecord {
        CostRecord {
            cost_id: generate_id("cost"),
            job_id: self.job_id,
            job_task_id: self.job_task_id,
            data_source_id: self.data_source_id,
            domain_id: self.domain_id,
            original_cost: self.original_cost,
            original_currency: self.original_currency,
            usage_quantity: self.usage_quantity,
            provider: self.provider,
            region_code: self.region_code,
            product: self.product,
            account: self.account,
            usage_type: self.usage_type,
            resource: self.resource,
            tags: self.tags,
            additional_info: self.additional_info,
            billed_at: self.billed_at,
            created_at: Utc::now(),
        }
    }
}

/// A persisted cost line item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostRecord {
    pub cost_id: String,
    pub job_id: String,
    pub job_task_id: String,
    pub data_source_id: String,
    pub domain_id: String,
    pub original_cost: f64,
    pub original_currency: String,
    pub usage_quantity: Option<f64>,
    pub provider: Option<String>,
    pub region_code: Option<String>,
    pub product: Option<String>,
    pub account: Option<String>,
    pub usage_type: Option<String>,
    pub resource: Option<String>,
    pub tags: HashMap<String, String>,
    pub additional_info: serde_json::Map<String, serde_json::Value>,
    pub billed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cost() -> NewCost {
        NewCost {
            job_id: "job-1".into(),
            job_task_id: "job-task-1".into(),
            data_source_id: "ds-1".into(),
            domain_id: "domain-1".into(),
            original_cost: 10.0,
            original_currency: "USD".into(),
            billed_at: parse_timestamp("2023-01-01T00:00:00Z").unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn task_status_transitions() {
        use JobTaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Success));
        assert!(InProgress.can_transition_to(Error));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Success.can_transition_to(Error));
        assert!(!Error.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(InProgress));
    }

    #[test]
    fn ensure_transition_reports_both_states() {
        let job = Job::new("ds-1", "domain-1", 1, None);
        let mut task = JobTask::new(&job, serde_json::json!({}));
        task.status = JobTaskStatus::Success;
        let err = task.ensure_transition(JobTaskStatus::Error).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SUCCESS -> ERROR"), "{msg}");
        assert_eq!(err.code(), "ERROR_INVALID_STATUS");
    }

    #[test]
    fn job_status_wire_names() {
        assert_eq!(serde_json::to_string(&JobStatus::InProgress).unwrap(), r#""IN_PROGRESS""#);
        assert_eq!("CANCELED".parse::<JobStatus>().unwrap(), JobStatus::Canceled);
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn new_job_counts_all_tasks_as_remaining() {
        let job = Job::new("ds-1", "domain-1", 3, None);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.remained_tasks, 3);
        assert!(job.job_id.starts_with("job-"));
        assert!(!job.is_closable());
    }

    #[test]
    fn parse_timestamp_variants() {
        let z = parse_timestamp("2023-01-01T00:00:00Z").unwrap();
        let offset = parse_timestamp("2023-01-01T09:00:00+09:00").unwrap();
        let naive = parse_timestamp("2023-01-01T00:00:00").unwrap();
        assert_eq!(z, offset);
        assert_eq!(z, naive);
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(CoreError::Timestamp { .. })
        ));
    }

    #[test]
    fn validate_rejects_missing_provenance() {
        let mut cost = sample_cost();
        assert!(cost.validate().is_ok());
        cost.job_id = String::new();
        let err = cost.validate().unwrap_err();
        assert!(err.to_string().contains("job_id"));
    }

    #[test]
    fn validate_rejects_non_finite_cost() {
        let mut cost = sample_cost();
        cost.original_cost = f64::NAN;
        assert!(cost.validate().is_err());
    }

    #[test]
    fn into_record_assigns_id() {
        let record = sample_cost().into_record();
        assert!(record.cost_id.starts_with("cost-"));
        assert_eq!(record.original_currency, "USD");
    }

    #[test]
    fn plugin_info_defaults() {
        let info: PluginInfo =
            serde_json::from_str(r#"{"plugin_id":"aws-cost","version":"1.0"}"#).unwrap();
        assert!(info.secret_id.is_none());
        assert!(info.options.is_empty());
        assert_eq!(info.upgrade_mode, UpgradeMode::Auto);
    }

    #[test]
    fn task_request_normalizes_null_options() {
        let request: TaskRequest =
            serde_json::from_str(r#"{"task_options":null,"job_task_id":"job-task-1","domain_id":"d"}"#).unwrap();
        let request = request.normalize().unwrap();
        assert_eq!(request.task_options, serde_json::json!({}));
    }

    #[test]
    fn task_request_rejects_blank_ids_and_scalar_options() {
        let blank = TaskRequest {
            task_options: serde_json::json!({}),
            job_task_id: " ".into(),
            domain_id: "d".into(),
        };
        assert!(matches!(blank.normalize(), Err(CoreError::Validation(_))));

        let scalar = TaskRequest {
            task_options: serde_json::json!("2023-01"),
            job_task_id: "job-task-1".into(),
            domain_id: "d".into(),
        };
        assert!(matches!(scalar.normalize(), Err(CoreError::Validation(_))));
    }
}
