use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use runbox::api::models::{ArchiveUploadedResponse, BoxView, JobAcceptedResponse, JobView};
use runbox::api::{self, AppState, USER_HEADER};
use runbox::config::{ByteSize, Config};
use runbox::dispatch::JobPublisher;
use runbox::ledger::FjallStore;
use runbox::model::JobState;
use runbox::observability::Metrics;
use runbox::queue::{Broker, BrokerSettings, FjallQueue};
use runbox::storage::ArchiveStore;

struct TestApp {
    app: Router,
    queue: Arc<FjallQueue>,
    _temp_dir: TempDir,
}

/// Builds a test app with isolated dependencies
fn build_test_app() -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let store = Arc::new(
        FjallStore::open(temp_dir.path().join("ledger")).expect("Failed to open test Fjall store"),
    );
    let queue = Arc::new(
        FjallQueue::open(temp_dir.path().join("queue")).expect("Failed to open test queue"),
    );
    let metrics = Arc::new(Metrics::new());
    let broker = Broker::new(queue.clone(), BrokerSettings::default(), metrics.clone());

    let mut config = Config::default();
    config.server.api.max_archive_bytes = ByteSize(1024);

    let state = AppState::new(
        config,
        store,
        ArchiveStore::in_memory(),
        JobPublisher::new(Arc::new(broker)),
        metrics,
    );

    TestApp {
        app: api::router(state),
        queue,
        _temp_dir: temp_dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post_json(uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .header(USER_HEADER, user)
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(USER_HEADER, user)
        .body(Body::empty())
        .unwrap()
}

async fn upload_archive(app: &Router, user: &str) -> String {
    let request = Request::builder()
        .uri("/archives")
        .method("POST")
        .header(USER_HEADER, user)
        .body(Body::from("FROM alpine\n"))
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let uploaded: ArchiveUploadedResponse = serde_json::from_value(body).unwrap();
    assert_eq!(uploaded.size, 12);
    uploaded.archive_id
}

async fn create_sum_box(app: &Router, user: &str, visibility: &str) -> BoxView {
    let archive_id = upload_archive(app, user).await;
    let (status, body) = send(
        app,
        post_json(
            "/boxes",
            user,
            json!({
                "archive_id": archive_id,
                "name": "sum",
                "visibility": visibility,
                "inputs": [
                    {"name": "A", "type": "integer"},
                    {"name": "B", "type": "integer"}
                ],
                "outputs": [{"name": "Sum", "type": "integer"}]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn test_submit_job_success() {
    let test = build_test_app();
    let view = create_sum_box(&test.app, "alice", "private").await;
    assert_eq!(view.owner_id, "alice");
    assert_eq!(view.inputs.len(), 2);

    let (status, body) = send(
        &test.app,
        post_json(
            &format!("/boxes/{}/jobs", view.id),
            "alice",
            json!({"input": ["1", 2]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: JobAcceptedResponse = serde_json::from_value(body).unwrap();
    assert_eq!(accepted.state, JobState::Pending);

    // Published for the listener
    assert_eq!(test.queue.current_seq(), 1);

    let (status, body) = send(&test.app, get(&format!("/jobs/{}", accepted.job_id), "alice")).await;
    assert_eq!(status, StatusCode::OK);
    let job: JobView = serde_json::from_value(body).unwrap();
    assert_eq!(job.box_id, view.id);
    assert_eq!(job.input.len(), 2);
    assert!(job.result.is_none());
}

#[tokio::test]
async fn test_job_is_private_to_its_owner() {
    let test = build_test_app();
    let view = create_sum_box(&test.app, "alice", "public").await;

    let (_, body) = send(
        &test.app,
        post_json(
            &format!("/boxes/{}/jobs", view.id),
            "bob",
            json!({"input": [3, 4]}),
        ),
    )
    .await;
    let accepted: JobAcceptedResponse = serde_json::from_value(body).unwrap();

    let (status, _) = send(&test.app, get(&format!("/jobs/{}", accepted.job_id), "alice")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&test.app, get("/jobs?state=pending", "bob")).await;
    assert_eq!(status, StatusCode::OK);
    let jobs: Vec<JobView> = serde_json::from_value(body).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].owner_id, "bob");

    let (_, body) = send(&test.app, get("/jobs?state=finished", "bob")).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_private_box_hidden_from_others() {
    let test = build_test_app();
    let view = create_sum_box(&test.app, "alice", "private").await;

    let (status, _) = send(&test.app, get(&format!("/boxes/{}", view.id), "alice")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&test.app, get(&format!("/boxes/{}", view.id), "mallory")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = send(
        &test.app,
        post_json(
            &format!("/boxes/{}/jobs", view.id),
            "mallory",
            json!({"input": ["1", "2"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_input_returns_domain_code() {
    let test = build_test_app();
    let view = create_sum_box(&test.app, "alice", "private").await;
    let uri = format!("/boxes/{}/jobs", view.id);

    let (status, body) = send(&test.app, post_json(&uri, "alice", json!({"input": ["1"]}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "assemble-values-mismatch");

    let (status, body) = send(
        &test.app,
        post_json(&uri, "alice", json!({"input": ["1", "two"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "assemble-value-parse-error");

    assert_eq!(test.queue.current_seq(), 0);
}

#[tokio::test]
async fn test_missing_user_header() {
    let test = build_test_app();
    let request = Request::builder()
        .uri("/jobs")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_USER");
}

#[tokio::test]
async fn test_create_box_requires_json() {
    let test = build_test_app();
    let request = Request::builder()
        .uri("/boxes")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .header(USER_HEADER, "alice")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_create_box_with_unknown_archive() {
    let test = build_test_app();
    let (status, _) = send(
        &test.app,
        post_json(
            "/boxes",
            "alice",
            json!({"archive_id": "missing", "name": "sum"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_box_duplicate_field() {
    let test = build_test_app();
    let archive_id = upload_archive(&test.app, "alice").await;
    let (status, body) = send(
        &test.app,
        post_json(
            "/boxes",
            "alice",
            json!({
                "archive_id": archive_id,
                "name": "dup",
                "inputs": [
                    {"name": "A", "type": "integer"},
                    {"name": "A", "type": "string"}
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("more than once"));
}

#[tokio::test]
async fn test_archive_too_large() {
    let test = build_test_app();
    let request = Request::builder()
        .uri("/archives")
        .method("POST")
        .header(USER_HEADER, "alice")
        .body(Body::from(vec![0u8; 2048]))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn test_empty_archive_rejected() {
    let test = build_test_app();
    let request = Request::builder()
        .uri("/archives")
        .method("POST")
        .header(USER_HEADER, "alice")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let test = build_test_app();

    let (status, body) = send(&test.app, get("/health", "ops")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["ledger"], "healthy");

    let view = create_sum_box(&test.app, "alice", "private").await;
    send(
        &test.app,
        post_json(
            &format!("/boxes/{}/jobs", view.id),
            "alice",
            json!({"input": [1, 2]}),
        ),
    )
    .await;

    let (status, body) = send(&test.app, get("/operators/metrics", "ops")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs_submitted"], 1);
}
