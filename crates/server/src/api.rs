//! HTTP handlers. Every `/v1` route passes through the auth guard first.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use costsync_core::{Job, JobTask, TaskRequest};
use costsync_queue::QueueStatus;
use costsync_sync::SyncError;

use crate::auth::{authorize, log_mutation, ApiError};
use crate::state::AppState;

/// Map a sync error to an HTTP response.
fn sync_err(e: SyncError) -> ApiError {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": e.to_string(), "code": e.code() })))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

// ── Health ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueReport>,
}

#[derive(Serialize)]
pub struct QueueReport {
    pub connected: bool,
    #[serde(flatten)]
    pub status: Option<QueueStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health
///
/// Always 200; `status` turns `degraded` when the task queue is unreachable.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let queue = match &state.queue {
        None => None,
        Some(consumer) => Some(match consumer.status().await {
            Ok(status) => QueueReport {
                connected: true,
                status: Some(status),
                error: None,
            },
            Err(e) => {
                warn!(code = e.code(), error = %e, "queue status check failed");
                QueueReport {
                    connected: false,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        }),
    };
    let degraded = queue.as_ref().is_some_and(|q| !q.connected);
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        queue,
    })
}

// ── Job tasks ─────────────────────────────────────────────────

/// POST /v1/job-tasks/get-cost-data
///
/// Runs the task to completion; 204 once it is terminal, whatever its
/// outcome. Only claim failures surface as errors. Null `task_options`
/// run as `{}`.
pub async fn get_cost_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Result<StatusCode, ApiError> {
    let req = req.normalize().map_err(|e| bad_request(&e.to_string()))?;
    let ctx = authorize(&state, &headers, &req.domain_id)?;
    log_mutation(&ctx, "get_cost_data", &req.job_task_id);

    state
        .orchestrator
        .get_cost_data(&ctx, req.task_options, &req.job_task_id)
        .await
        .map_err(sync_err)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DomainQuery {
    pub domain_id: String,
}

/// GET /v1/job-tasks/{job_task_id}?domain_id=
pub async fn get_job_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_task_id): Path<String>,
    Query(query): Query<DomainQuery>,
) -> Result<Json<JobTask>, ApiError> {
    let ctx = authorize(&state, &headers, &query.domain_id)?;
    let task = state
        .orchestrator
        .tasks()
        .get_job_task(&job_task_id, &ctx.domain_id)
        .await
        .map_err(|e| sync_err(e.into()))?;
    Ok(Json(task))
}

/// GET /v1/jobs/{job_id}?domain_id=
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Query(query): Query<DomainQuery>,
) -> Result<Json<Job>, ApiError> {
    let ctx = authorize(&state, &headers, &query.domain_id)?;
    let job = state
        .orchestrator
        .jobs()
        .get_job(&job_id, &ctx.domain_id)
        .await
        .map_err(|e| sync_err(e.into()))?;
    Ok(Json(job))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use std::collections::HashMap;

    use costsync_core::{JobStatus, JobTaskStatus};
    use costsync_queue::MemoryQueue;

    use crate::router::build_router;
    use crate::testing::{Fixture, DOMAIN, TOKEN};

    use super::*;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn run_request(job_task_id: &str, domain_id: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/job-tasks/get-cost-data")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = json!({
            "task_options": { "month": "2023-01" },
            "job_task_id": job_task_id,
            "domain_id": domain_id,
        });
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let fixture = Fixture::new().await;
        let response = build_router(fixture.state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn health_reports_queue_backlog() {
        let fixture = Fixture::new().await;
        let queue = Arc::new(MemoryQueue::new());
        queue.send("{}").await;
        queue.send("{}").await;
        let state = AppState::new(fixture.orchestrator.clone(), HashMap::new()).with_queue(queue);

        let response = build_router(Arc::new(state))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["queue"]["connected"], true);
        assert_eq!(body["queue"]["provider"], "memory");
        assert_eq!(body["queue"]["waiting"], 2);
    }

    #[tokio::test]
    async fn health_omits_queue_when_worker_is_off() {
        let fixture = Fixture::new().await;
        let response = build_router(fixture.state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(body_json(response).await.get("queue").is_none());
    }

    #[tokio::test]
    async fn runs_task_and_returns_no_content() {
        let fixture = Fixture::new().await;
        let (job, task) = fixture.job_with_task().await;
        let app = build_router(fixture.state());

        let response = app
            .clone()
            .oneshot(run_request(&task.job_task_id, DOMAIN, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(get(&format!("/v1/job-tasks/{}?domain_id={DOMAIN}", task.job_task_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], JobTaskStatus::Success.as_str());
        assert_eq!(body["ingested_count"], 2);
        assert_eq!(body["task_options"]["month"], "2023-01");

        let response = app
            .oneshot(get(&format!("/v1/jobs/{}?domain_id={DOMAIN}", job.job_id)))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], JobStatus::Success.as_str());
        assert_eq!(body["remained_tasks"], 0);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let fixture = Fixture::new().await;
        let (_, task) = fixture.job_with_task().await;

        let response = build_router(fixture.state())
            .oneshot(run_request(&task.job_task_id, DOMAIN, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(fixture.task(&task.job_task_id).await.status, JobTaskStatus::Pending);
    }

    #[tokio::test]
    async fn token_for_other_domain_is_forbidden() {
        let fixture = Fixture::new().await;
        let (_, task) = fixture.job_with_task().await;

        let response = build_router(fixture.state())
            .oneshot(run_request(&task.job_task_id, "domain-other", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let fixture = Fixture::new().await;
        let response = build_router(fixture.state())
            .oneshot(run_request("job-task-missing", DOMAIN, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["code"], "ERROR_NOT_FOUND");
        assert!(body["error"].as_str().unwrap().contains("job-task-missing"));
    }

    #[tokio::test]
    async fn rerun_of_finished_task_is_bad_request() {
        let fixture = Fixture::new().await;
        let (_, task) = fixture.job_with_task().await;
        let app = build_router(fixture.state());

        let first = app
            .clone()
            .oneshot(run_request(&task.job_task_id, DOMAIN, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::NO_CONTENT);

        let second = app
            .oneshot(run_request(&task.job_task_id, DOMAIN, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(second).await["code"], "ERROR_INVALID_STATUS");
    }

    #[tokio::test]
    async fn empty_ids_are_rejected_before_auth() {
        let fixture = Fixture::new().await;
        let response = build_router(fixture.state())
            .oneshot(run_request("", DOMAIN, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn run_with_options(job_task_id: &str, task_options: Value) -> Request<Body> {
        let body = json!({
            "task_options": task_options,
            "job_task_id": job_task_id,
            "domain_id": DOMAIN,
        });
        Request::builder()
            .method("POST")
            .uri("/v1/job-tasks/get-cost-data")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn null_task_options_reach_plugin_as_empty_object() {
        let fixture = Fixture::new().await;
        let (_, task) = fixture.job_with_task().await;

        let response = build_router(fixture.state())
            .oneshot(run_with_options(&task.job_task_id, Value::Null))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(fixture.plugin.seen_task_options(), vec![json!({})]);
    }

    #[tokio::test]
    async fn scalar_task_options_are_bad_request() {
        let fixture = Fixture::new().await;
        let (_, task) = fixture.job_with_task().await;

        let response = build_router(fixture.state())
            .oneshot(run_with_options(&task.job_task_id, json!("2023-01")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(fixture.task(&task.job_task_id).await.status, JobTaskStatus::Pending);
        assert!(fixture.plugin.seen_task_options().is_empty());
    }
}
