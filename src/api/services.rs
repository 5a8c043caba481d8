use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::collections::HashMap;
use tracing::info;

use super::{
    models::{
        ArchiveUploadedResponse, BoxView, CreateBoxRequest, HealthResponse, JobAcceptedResponse,
        JobListQuery, JobView, RawInput, SubmitJobRequest,
    },
    state::AppState,
    utils::{caller_id, require_json},
    validation::validate_box,
};
use crate::api::error::ApiError;
use crate::ledger::{BlueprintRepository, JobRepository};
use crate::model::Blueprint;

/// Archive upload endpoint (POST /archives)
///
/// The body is the raw build context (a tar archive with a Dockerfile at
/// its root). It is stored as-is; nothing is built until a job runs.
pub async fn upload_archive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_id(&headers)?;
    let limit = state.config.server.api.max_archive_bytes.as_usize();
    let data = read_body(body, limit).await?;

    let uploaded = state.archives.upload(data).await?;
    info!(archive_id = %uploaded.archive_id, size = uploaded.size, owner_id = %caller, "Archive uploaded");

    let response = ArchiveUploadedResponse {
        archive_id: uploaded.archive_id,
        size: uploaded.size,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Box creation endpoint (POST /boxes)
///
/// ## Flow:
/// 1. Identify the caller and require a JSON body within the payload limit
/// 2. Validate names and schemas
/// 3. Check the referenced archive exists
/// 4. Build the blueprint owned by the caller and persist it
pub async fn create_box(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_id(&headers)?;
    require_json(&headers)?;
    let limit = state.config.server.api.max_payload_bytes.as_usize();
    let data = read_body(body, limit).await?;

    let request: CreateBoxRequest = serde_json::from_slice(&data)?;
    validate_box(&request)?;

    if !state.archives.exists(&request.archive_id).await? {
        return Err(ApiError::NotFound(format!("archive {}", request.archive_id)));
    }

    let blueprint = Blueprint::builder()
        .owner_id(caller)
        .archive_id(request.archive_id)
        .name(request.name.trim())
        .maybe_description(request.description)
        .visibility(request.visibility)
        .input_schema(request.inputs)
        .output_schema(request.outputs)
        .build()?;

    state.store.save_blueprint(&blueprint).await?;
    info!(
        blueprint_id = %blueprint.id(),
        owner_id = %blueprint.owner_id(),
        "Box created"
    );

    Ok((StatusCode::CREATED, Json(BoxView::from(&blueprint))))
}

/// Box lookup (GET /boxes/{box_id})
///
/// Private boxes of other users are reported as missing.
pub async fn get_box(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(box_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_id(&headers)?;
    let blueprint = state
        .store
        .blueprint(&box_id)
        .await?
        .filter(|blueprint| blueprint.is_available_for(&caller))
        .ok_or_else(|| ApiError::NotFound(format!("box {box_id}")))?;

    Ok(Json(BoxView::from(&blueprint)))
}

/// Job submission (POST /boxes/{box_id}/jobs)
///
/// Returns 202 once the job is persisted and its ID published; execution
/// happens asynchronously.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(box_id): Path<String>,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_id(&headers)?;
    require_json(&headers)?;
    let limit = state.config.server.api.max_payload_bytes.as_usize();
    let data = read_body(body, limit).await?;

    let request: SubmitJobRequest = serde_json::from_slice(&data)?;
    let raw_input: Vec<String> = request.input.into_iter().map(RawInput::into_text).collect();

    let job = state.submitter.submit(&caller, &box_id, &raw_input).await?;

    let response = JobAcceptedResponse {
        job_id: job.id().to_string(),
        state: job.state(),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Job status endpoint (GET /jobs/{job_id})
///
/// Only the job's owner can see it.
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_id(&headers)?;
    let job = state
        .store
        .job(&job_id)
        .await?
        .filter(|job| job.owner_id() == caller)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    Ok(Json(JobView::from(&job)))
}

/// Caller's jobs, newest first (GET /jobs?state=...)
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<JobListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = caller_id(&headers)?;
    let jobs = match query.state {
        Some(job_state) => state.store.user_jobs_with_state(&caller, job_state).await?,
        None => state.store.user_jobs(&caller).await?,
    };

    let views: Vec<JobView> = jobs.iter().map(JobView::from).collect();
    Ok(Json(views))
}

/// Health check endpoint (GET /health)
///
/// Returns 503 Service Unavailable if the ledger or the message substrate
/// does not answer.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "ledger".to_string(),
        status_label(state.store.health_check().is_ok()),
    );
    components.insert(
        "dispatch".to_string(),
        status_label(state.publisher.health().await),
    );

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: status_label(all_healthy),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

/// Counter snapshot (GET /operators/metrics)
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

fn status_label(healthy: bool) -> String {
    if healthy { "healthy" } else { "unhealthy" }.to_string()
}

/// Reads the request body, failing once it exceeds `limit` bytes
///
/// Decompression is handled by RequestDecompressionLayer, so the limit
/// applies to decompressed data.
async fn read_body(body: axum::body::Body, limit: usize) -> Result<Bytes, ApiError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ApiError::PayloadTooLarge(limit))
        }
        Err(err) => Err(ApiError::InvalidPayload(err.to_string())),
    }
}
