//! API integration tests for job submission and status polling.
//!
//! Tests verify:
//! - Enqueue responses (accepted, invalid body, unknown user, broker down)
//! - Status polling returns the stored JSON unchanged
//! - HTTP response codes and headers

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use imago_pipeline::broker::{MemoryBroker, MessagePublisher};
use imago_pipeline::model::{CallbackId, JobState, TransformationStatus};
use imago_pipeline::pipeline::TransformationProducer;
use imago_pipeline::repository::MemoryRepository;
use imago_pipeline::status::StatusCache;
use imago_pipeline::{create_router, AppState, RouterConfig};

use super::test_utils::{FailingPublisher, FailingStatusStore, TEST_TTL};

struct TestApp {
    router: Router,
    broker: Arc<MemoryBroker>,
    statuses: StatusCache,
    user_id: Uuid,
}

async fn test_app() -> TestApp {
    let broker = Arc::new(MemoryBroker::new());
    let statuses = StatusCache::in_memory(TEST_TTL);
    let repo = Arc::new(MemoryRepository::new());
    let user = repo.insert_user("bob").await;

    let producer = TransformationProducer::new(broker.clone(), statuses.clone());
    let state = AppState::new(producer).with_users(repo);

    TestApp {
        router: create_router(state, RouterConfig::new().with_tracing(false)),
        broker,
        statuses,
        user_id: user.id,
    }
}

fn app_with(publisher: Arc<dyn MessagePublisher>, statuses: StatusCache) -> Router {
    let producer = TransformationProducer::new(publisher, statuses);
    create_router(AppState::new(producer), RouterConfig::new().with_tracing(false))
}

fn post_job(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn job_body(user_id: Uuid, format: &str) -> Value {
    json!({
        "imageId": 7,
        "userId": user_id,
        "transformations": {
            "resize": {"width": 100, "height": 0},
            "rotate": 90,
            "format": format
        }
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Enqueue
// =============================================================================

#[tokio::test]
async fn test_enqueue_returns_pending_status() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(post_job(&job_body(app.user_id, "png")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["status"], "pending");
    assert_eq!(json["imageId"], 7);
    assert_eq!(json["error"], "");

    let id: CallbackId = json["statusId"].as_str().unwrap().parse().unwrap();
    let stored = app.statuses.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(app.broker.queued(), 1);
}

#[tokio::test]
async fn test_enqueue_rejects_missing_format() {
    let app = test_app().await;

    let mut body = job_body(app.user_id, "png");
    body["transformations"]
        .as_object_mut()
        .unwrap()
        .remove("format");

    let response = app.router.clone().oneshot(post_job(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
    assert_eq!(app.broker.queued(), 0);
}

#[tokio::test]
async fn test_enqueue_rejects_blank_format() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(post_job(&job_body(app.user_id, "  ")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.broker.queued(), 0);
}

#[tokio::test]
async fn test_enqueue_rejects_malformed_json() {
    let app = test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_enqueue_unknown_user() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(post_job(&job_body(Uuid::new_v4(), "png")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "user_not_found");
    assert_eq!(app.broker.queued(), 0);
}

#[tokio::test]
async fn test_enqueue_broker_unavailable() {
    let statuses = StatusCache::in_memory(TEST_TTL);
    let router = app_with(Arc::new(FailingPublisher), statuses.clone());

    let response = router
        .oneshot(post_job(&job_body(Uuid::new_v4(), "png")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["error"], "broker_unavailable");
    assert_eq!(json["status"], 503);
}

#[tokio::test]
async fn test_enqueue_status_write_failure_after_publish() {
    let broker = Arc::new(MemoryBroker::new());
    let statuses = StatusCache::new(Arc::new(FailingStatusStore), TEST_TTL);
    let router = app_with(broker.clone(), statuses);

    let response = router
        .oneshot(post_job(&job_body(Uuid::new_v4(), "png")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["error"], "status_unavailable");
    assert!(json["message"].as_str().unwrap().contains("was queued"));

    // The job itself is on the broker
    assert_eq!(broker.queued(), 1);
}

// =============================================================================
// Status Polling
// =============================================================================

#[tokio::test]
async fn test_status_returns_stored_json() {
    let app = test_app().await;

    let id = CallbackId::new();
    let status = TransformationStatus::failed(id, 7, "failed to download image: gone");
    app.statuses.put(&status).await.unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/jobs/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let raw = app.statuses.get_raw(&id.to_string()).await.unwrap().unwrap();
    assert_eq!(body, raw);

    let parsed: TransformationStatus = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed, status);
}

#[tokio::test]
async fn test_status_after_enqueue_is_pending() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(post_job(&job_body(app.user_id, "webp")))
        .await
        .unwrap();
    let id = body_json(response).await["statusId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/jobs/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "pending");
}

#[tokio::test]
async fn test_status_unknown_id() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/jobs/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_status_cache_unavailable() {
    let router = app_with(
        Arc::new(MemoryBroker::new()),
        StatusCache::new(Arc::new(FailingStatusStore), TEST_TTL),
    );

    let response = router
        .oneshot(get(&format!("/jobs/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// Health and CORS
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = test_app().await;

    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = test_app().await;

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/jobs")
        .header("origin", "https://example.com")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}
