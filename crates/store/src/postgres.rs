//! PostgreSQL store.
//!
//! Lifecycle steps are single conditional `UPDATE ... RETURNING` statements
//! (inside one transaction for `finish_job_task`), so concurrent tasks of
//! the same job serialize on the job row instead of racing in application
//! code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use costsync_core::config::PostgresConfig;
use costsync_core::{
    CoreError, CostField, CostQuery, CostRecord, DataSource, FilterValue, Job, JobProgress,
    JobStatus, JobTask, JobTaskStatus, PluginInfo, TaskOutcome,
};

use crate::error::StoreError;
use crate::traits::{CostRepository, DataSourceRepository, JobRepository, JobTaskRepository};

const JOB_COLUMNS: &str = "job_id, data_source_id, domain_id, status, total_tasks, remained_tasks, \
     last_changed_at, created_at, updated_at, finished_at";

const TASK_COLUMNS: &str = "job_task_id, job_id, data_source_id, domain_id, task_options, status, \
     ingested_count, error_code, error_message, created_at, started_at, finished_at";

const DATA_SOURCE_COLUMNS: &str =
    "data_source_id, domain_id, name, state, plugin_info, last_synchronized_at, created_at";

const COST_COLUMNS: &str = "cost_id, job_id, job_task_id, data_source_id, domain_id, original_cost, \
     original_currency, usage_quantity, provider, region_code, product, account, usage_type, \
     resource, tags, additional_info, billed_at, created_at";

/// Store backed by a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ── Row mapping ───────────────────────────────────────────────

fn count_from(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Other(format!("negative {} in database: {}", column, value)))
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        job_id: row.try_get("job_id")?,
        data_source_id: row.try_get("data_source_id")?,
        domain_id: row.try_get("domain_id")?,
        status: status.parse()?,
        total_tasks: count_from(row.try_get("total_tasks")?, "total_tasks")?,
        remained_tasks: count_from(row.try_get("remained_tasks")?, "remained_tasks")?,
        last_changed_at: row.try_get("last_changed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<JobTask, StoreError> {
    let status: String = row.try_get("status")?;
    let Json(task_options): Json<serde_json::Value> = row.try_get("task_options")?;
    let ingested_count: i64 = row.try_get("ingested_count")?;
    Ok(JobTask {
        job_task_id: row.try_get("job_task_id")?,
        job_id: row.try_get("job_id")?,
        data_source_id: row.try_get("data_source_id")?,
        domain_id: row.try_get("domain_id")?,
        task_options,
        status: status.parse()?,
        ingested_count: ingested_count.max(0) as u64,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn data_source_from_row(row: &PgRow) -> Result<DataSource, StoreError> {
    let state: String = row.try_get("state")?;
    let Json(plugin_info): Json<PluginInfo> = row.try_get("plugin_info")?;
    Ok(DataSource {
        data_source_id: row.try_get("data_source_id")?,
        domain_id: row.try_get("domain_id")?,
        name: row.try_get("name")?,
        state: serde_json::from_value(serde_json::Value::String(state)).map_err(CoreError::from)?,
        plugin_info,
        last_synchronized_at: row.try_get("last_synchronized_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn cost_from_row(row: &PgRow) -> Result<CostRecord, StoreError> {
    let Json(tags): Json<std::collections::HashMap<String, String>> = row.try_get("tags")?;
    let Json(additional_info): Json<serde_json::Map<String, serde_json::Value>> =
        row.try_get("additional_info")?;
    Ok(CostRecord {
        cost_id: row.try_get("cost_id")?,
        job_id: row.try_get("job_id")?,
        job_task_id: row.try_get("job_task_id")?,
        data_source_id: row.try_get("data_source_id")?,
        domain_id: row.try_get("domain_id")?,
        original_cost: row.try_get("original_cost")?,
        original_currency: row.try_get("original_currency")?,
        usage_quantity: row.try_get("usage_quantity")?,
        provider: row.try_get("provider")?,
        region_code: row.try_get("region_code")?,
        product: row.try_get("product")?,
        account: row.try_get("account")?,
        usage_type: row.try_get("usage_type")?,
        resource: row.try_get("resource")?,
        tags,
        additional_info,
        billed_at: row.try_get("billed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Append `WHERE` conditions for every filter, binding coerced operands.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &CostQuery) -> Result<(), StoreError> {
    for (i, filter) in query.filter.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push(filter.field()?.column())
            .push(" ")
            .push(filter.operator.sql())
            .push(" ");
        match filter.typed_value()? {
            FilterValue::Number(n) => qb.push_bind(n),
            FilterValue::Timestamp(t) => qb.push_bind(t),
            FilterValue::Text(s) => qb.push_bind(s),
        };
    }
    Ok(())
}

fn invalid_task_status(job_task_id: &str, current: &str, next: JobTaskStatus) -> StoreError {
    CoreError::InvalidStatus {
        entity: "job task",
        id: job_task_id.to_string(),
        from: current.to_string(),
        to: next.to_string(),
    }
    .into()
}

// ── Jobs ──────────────────────────────────────────────────────

#[async_trait]
impl JobRepository for PgStore {
    async fn create_job(&self, job: Job) -> Result<Job, StoreError> {
        sqlx::query(
            "INSERT INTO jobs (job_id, data_source_id, domain_id, status, total_tasks, remained_tasks,
                               last_changed_at, created_at, updated_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&job.job_id)
        .bind(&job.data_source_id)
        .bind(&job.domain_id)
        .bind(job.status.as_str())
        .bind(job.total_tasks as i32)
        .bind(job.remained_tasks as i32)
        .bind(job.last_changed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn get_job(&self, job_id: &str, domain_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE job_id = $1 AND domain_id = $2",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn cancel_job(&self, job_id: &str, domain_id: &str) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = 'CANCELED', updated_at = now()
             WHERE job_id = $1 AND domain_id = $2 AND status IN ('PENDING', 'IN_PROGRESS')
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => job_from_row(&row),
            None => match self.get_job(job_id, domain_id).await? {
                Some(job) => Err(CoreError::InvalidStatus {
                    entity: "job",
                    id: job_id.to_string(),
                    from: job.status.to_string(),
                    to: JobStatus::Canceled.to_string(),
                }
                .into()),
                None => Err(StoreError::not_found("job", job_id)),
            },
        }
    }

    async fn claim_close(&self, job_id: &str, domain_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs
             SET finished_at = now(),
                 updated_at = now(),
                 status = CASE WHEN status = 'IN_PROGRESS' THEN 'SUCCESS' ELSE status END
             WHERE job_id = $1 AND domain_id = $2 AND remained_tasks = 0 AND finished_at IS NULL
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let job = job_from_row(&row)?;
                debug!(job_id, status = %job.status, "close claimed");
                Ok(Some(job))
            }
            None if self.get_job(job_id, domain_id).await?.is_some() => Ok(None),
            None => Err(StoreError::not_found("job", job_id)),
        }
    }
}

// ── Job tasks ─────────────────────────────────────────────────

#[async_trait]
impl JobTaskRepository for PgStore {
    async fn create_job_task(&self, task: JobTask) -> Result<JobTask, StoreError> {
        sqlx::query(
            "INSERT INTO job_tasks (job_task_id, job_id, data_source_id, domain_id, task_options, status,
                                    ingested_count, error_code, error_message, created_at, started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&task.job_task_id)
        .bind(&task.job_id)
        .bind(&task.data_source_id)
        .bind(&task.domain_id)
        .bind(Json(&task.task_options))
        .bind(task.status.as_str())
        .bind(task.ingested_count as i64)
        .bind(&task.error_code)
        .bind(&task.error_message)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(task)
    }

    async fn get_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<Option<JobTask>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM job_tasks WHERE job_task_id = $1 AND domain_id = $2",
            TASK_COLUMNS
        ))
        .bind(job_task_id)
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn start_job_task(&self, job_task_id: &str, domain_id: &str) -> Result<JobTask, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE job_tasks SET status = 'IN_PROGRESS', started_at = now()
             WHERE job_task_id = $1 AND domain_id = $2 AND status = 'PENDING'
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(job_task_id)
        .bind(domain_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM job_tasks WHERE job_task_id = $1 AND domain_id = $2")
                    .bind(job_task_id)
                    .bind(domain_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match current {
                Some(status) => invalid_task_status(job_task_id, &status, JobTaskStatus::InProgress),
                None => StoreError::not_found("job task", job_task_id),
            });
        };
        let task = task_from_row(&row)?;

        sqlx::query(
            "UPDATE jobs SET status = 'IN_PROGRESS', updated_at = now()
             WHERE job_id = $1 AND domain_id = $2 AND status = 'PENDING'",
        )
        .bind(&task.job_id)
        .bind(domain_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn finish_job_task(
        &self,
        job_task_id: &str,
        domain_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<(JobTask, JobProgress), StoreError> {
        let (ingested_count, error_code, error_message) = match outcome {
            TaskOutcome::Success { ingested_count } => (*ingested_count as i64, None, None),
            TaskOutcome::Error { code, message } => (0, Some(code.as_str()), Some(message.as_str())),
        };

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE job_tasks
             SET status = $3, ingested_count = $4, error_code = $5, error_message = $6, finished_at = now()
             WHERE job_task_id = $1 AND domain_id = $2 AND status = 'IN_PROGRESS'
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(job_task_id)
        .bind(domain_id)
        .bind(outcome.status().as_str())
        .bind(ingested_count)
        .bind(error_code)
        .bind(error_message)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM job_tasks WHERE job_task_id = $1 AND domain_id = $2")
                    .bind(job_task_id)
                    .bind(domain_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match current {
                Some(status) => invalid_task_status(job_task_id, &status, outcome.status()),
                None => StoreError::not_found("job task", job_task_id),
            });
        };
        let task = task_from_row(&row)?;

        let progress = sqlx::query(
            "UPDATE jobs
             SET remained_tasks = remained_tasks - 1,
                 status = CASE WHEN $3 AND status = 'IN_PROGRESS' THEN 'ERROR' ELSE status END,
                 updated_at = now()
             WHERE job_id = $1 AND domain_id = $2 AND remained_tasks > 0
             RETURNING remained_tasks, status",
        )
        .bind(&task.job_id)
        .bind(domain_id)
        .bind(outcome.is_error())
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping the transaction rolls back the task update.
        let Some(progress) = progress else {
            return Err(StoreError::Conflict(format!(
                "job {} has no remaining tasks to complete",
                task.job_id
            )));
        };
        let status: String = progress.try_get("status")?;
        let progress = JobProgress {
            remained_tasks: count_from(progress.try_get("remained_tasks")?, "remained_tasks")?,
            status: status.parse()?,
        };

        tx.commit().await?;
        Ok((task, progress))
    }
}

// ── Data sources ──────────────────────────────────────────────

#[async_trait]
impl DataSourceRepository for PgStore {
    async fn create_data_source(&self, data_source: DataSource) -> Result<DataSource, StoreError> {
        let state = serde_json::to_value(data_source.state).map_err(CoreError::from)?;
        sqlx::query(
            "INSERT INTO data_sources (data_source_id, domain_id, name, state, plugin_info,
                                       last_synchronized_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&data_source.data_source_id)
        .bind(&data_source.domain_id)
        .bind(&data_source.name)
        .bind(state.as_str().unwrap_or("ENABLED"))
        .bind(Json(&data_source.plugin_info))
        .bind(data_source.last_synchronized_at)
        .bind(data_source.created_at)
        .execute(&self.pool)
        .await?;
        Ok(data_source)
    }

    async fn get_data_source(&self, data_source_id: &str, domain_id: &str) -> Result<Option<DataSource>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM data_sources WHERE data_source_id = $1 AND domain_id = $2",
            DATA_SOURCE_COLUMNS
        ))
        .bind(data_source_id)
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(data_source_from_row).transpose()
    }

    async fn update_last_synchronized_at(
        &self,
        data_source_id: &str,
        domain_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DataSource, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE data_sources SET last_synchronized_at = $3
             WHERE data_source_id = $1 AND domain_id = $2
             RETURNING {}",
            DATA_SOURCE_COLUMNS
        ))
        .bind(data_source_id)
        .bind(domain_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("data source", data_source_id))?;
        data_source_from_row(&row)
    }

    async fn update_plugin_version(
        &self,
        data_source_id: &str,
        domain_id: &str,
        version: &str,
    ) -> Result<DataSource, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE data_sources SET plugin_info = jsonb_set(plugin_info, '{{version}}', to_jsonb($3::text))
             WHERE data_source_id = $1 AND domain_id = $2
             RETURNING {}",
            DATA_SOURCE_COLUMNS
        ))
        .bind(data_source_id)
        .bind(domain_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("data source", data_source_id))?;
        data_source_from_row(&row)
    }
}

// ── Costs ─────────────────────────────────────────────────────

#[async_trait]
impl CostRepository for PgStore {
    async fn insert_cost(&self, record: CostRecord) -> Result<CostRecord, StoreError> {
        sqlx::query(&format!(
            "INSERT INTO costs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            COST_COLUMNS
        ))
        .bind(&record.cost_id)
        .bind(&record.job_id)
        .bind(&record.job_task_id)
        .bind(&record.data_source_id)
        .bind(&record.domain_id)
        .bind(record.original_cost)
        .bind(&record.original_currency)
        .bind(record.usage_quantity)
        .bind(&record.provider)
        .bind(&record.region_code)
        .bind(&record.product)
        .bind(&record.account)
        .bind(&record.usage_type)
        .bind(&record.resource)
        .bind(Json(&record.tags))
        .bind(Json(&record.additional_info))
        .bind(record.billed_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_costs(&self, query: &CostQuery) -> Result<(Vec<CostRecord>, u64), StoreError> {
        query.validate()?;
        let total = self.count_costs(query).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM costs", COST_COLUMNS));
        push_filters(&mut qb, query)?;

        let (field, desc) = match &query.sort {
            Some(sort) => (sort.key.parse::<CostField>()?, sort.desc),
            None => (CostField::CreatedAt, false),
        };
        qb.push(" ORDER BY ")
            .push(field.column())
            .push(if desc { " DESC" } else { " ASC" });

        if let Some(page) = query.page {
            qb.push(" LIMIT ")
                .push_bind(page.limit as i64)
                .push(" OFFSET ")
                .push_bind(((page.start - 1) * page.limit) as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let records = rows.iter().map(cost_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((records, total))
    }

    async fn count_costs(&self, query: &CostQuery) -> Result<u64, StoreError> {
        query.validate()?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM costs");
        push_filters(&mut qb, query)?;
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_costs(&self, query: &CostQuery) -> Result<u64, StoreError> {
        if query.filter.is_empty() {
            return Err(CoreError::Validation("refusing to delete costs without a filter".into()).into());
        }
        query.validate()?;
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM costs");
        push_filters(&mut qb, query)?;
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
