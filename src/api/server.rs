use axum::{Router, routing::get, routing::post};
use tower_http::decompression::RequestDecompressionLayer;

use super::{
    services::{create_box, get_box, get_job, health, list_jobs, metrics, submit_job, upload_archive},
    state::AppState,
};

/// All operator routes over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/archives", post(upload_archive))
        .route("/boxes", post(create_box))
        .route("/boxes/{box_id}", get(get_box))
        .route("/boxes/{box_id}/jobs", post(submit_job))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{job_id}", get(get_job))
        .route("/operators/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
        // Handles Content-Encoding transparently; size limits apply after
        // decompression
        .layer(RequestDecompressionLayer::new())
}
