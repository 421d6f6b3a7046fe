//! HTTP router construction.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

/// Build the application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/v1/job-tasks/get-cost-data", post(api::get_cost_data))
        .route("/v1/job-tasks/{job_task_id}", get(api::get_job_task))
        .route("/v1/jobs/{job_id}", get(api::get_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
