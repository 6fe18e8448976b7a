//! Delivery Fallback Integration Tests
//!
//! Real HTTP reporters against a mock backend on an ephemeral port. Each
//! endpoint is scripted to accept, reject (`{"success": false}`) or fail with
//! a 500, and counts the requests it receives.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use livetrack::delivery::{DeliveryError, DeliveryOutcome, Endpoint, HttpReporter, LocationReporter, LocationUpdate};
use livetrack::types::{DeliveryRequest, SessionContext};
use livetrack::{ActorRole, PositionFix, PublishPipeline};

// ============================================================================
// Mock Backend
// ============================================================================

#[derive(Clone, Copy)]
enum Script {
    Accept,
    Reject,
    ServerError,
}

#[derive(Default)]
struct Backend {
    primary_hits: AtomicUsize,
    fallback_hits: AtomicUsize,
    received: Mutex<Vec<serde_json::Value>>,
}

#[derive(Clone)]
struct AppState {
    backend: Arc<Backend>,
    primary: Script,
    fallback: Script,
}

fn respond(script: Script) -> Response {
    match script {
        Script::Accept => Json(serde_json::json!({ "success": true })).into_response(),
        Script::Reject => Json(serde_json::json!({
            "success": false,
            "message": "order not assigned to reporter"
        }))
        .into_response(),
        Script::ServerError => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

async fn primary_handler(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    state.backend.primary_hits.fetch_add(1, Ordering::SeqCst);
    state.backend.received.lock().unwrap().push(body);
    respond(state.primary)
}

async fn fallback_handler(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    state.backend.fallback_hits.fetch_add(1, Ordering::SeqCst);
    state.backend.received.lock().unwrap().push(body);
    respond(state.fallback)
}

/// Serve the mock backend and return its base URL.
async fn spawn_backend(primary: Script, fallback: Script) -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/api/delivery/location", post(primary_handler))
        .route("/api/location/update", post(fallback_handler))
        .with_state(AppState {
            backend: backend.clone(),
            primary,
            fallback,
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), backend)
}

fn reporters(base_url: &str) -> (Arc<HttpReporter>, Arc<HttpReporter>) {
    let timeout = Duration::from_secs(5);
    (
        Arc::new(HttpReporter::new(base_url, "/api/delivery/location", timeout).unwrap()),
        Arc::new(HttpReporter::new(base_url, "/api/location/update", timeout).unwrap()),
    )
}

fn request(order_id: i64) -> DeliveryRequest {
    DeliveryRequest {
        fix: PositionFix::new(12.9716, 77.5946).with_accuracy(5.0),
        heading_deg: Some(90.0),
        session: SessionContext {
            session_id: Uuid::new_v4(),
            order_id,
            reporter_id: 7,
            role: ActorRole::Delivery,
        },
    }
}

fn update(order_id: i64) -> LocationUpdate {
    LocationUpdate::from_request(&request(order_id), Some("out_for_delivery"))
}

// ============================================================================
// Reporter
// ============================================================================

#[tokio::test]
async fn reporter_posts_update_json() {
    let (base_url, backend) = spawn_backend(Script::Accept, Script::Accept).await;
    let (primary, _) = reporters(&base_url);

    primary.report(&update(42)).await.unwrap();

    let received = backend.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["order_id"], 42);
    assert_eq!(received[0]["reporter_id"], 7);
    assert_eq!(received[0]["latitude"], 12.9716);
    assert_eq!(received[0]["status"], "out_for_delivery");
    assert_eq!(received[0]["heading"], 90.0);
}

#[tokio::test]
async fn success_false_envelope_is_rejection() {
    let (base_url, _backend) = spawn_backend(Script::Reject, Script::Accept).await;
    let (primary, _) = reporters(&base_url);

    match primary.report(&update(42)).await {
        Err(DeliveryError::Rejected { message }) => assert_eq!(message, "order not assigned to reporter"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_maps_to_status() {
    let (base_url, _backend) = spawn_backend(Script::ServerError, Script::Accept).await;
    let (primary, _) = reporters(&base_url);

    match primary.report(&update(42)).await {
        Err(DeliveryError::Status(status)) => assert_eq!(status.as_u16(), 500),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_backend_is_http_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let reporter = HttpReporter::new(&format!("http://{addr}"), "/api/location/update", Duration::from_secs(2)).unwrap();
    assert!(matches!(reporter.report(&update(42)).await, Err(DeliveryError::Http(_))));
}

// ============================================================================
// Pipeline
// ============================================================================

#[tokio::test]
async fn rejected_primary_falls_back_exactly_once() {
    let (base_url, backend) = spawn_backend(Script::Reject, Script::Accept).await;
    let (primary, fallback) = reporters(&base_url);
    let pipeline = PublishPipeline::new(primary, fallback, Some("out_for_delivery".to_string()), 4);
    let mut outcomes = pipeline.subscribe_outcomes();

    assert!(pipeline.enqueue(request(42)));

    match outcomes.recv().await.unwrap() {
        DeliveryOutcome::Delivered { via, order_id, .. } => {
            assert_eq!(via, Endpoint::Fallback);
            assert_eq!(order_id, 42);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(backend.primary_hits.load(Ordering::SeqCst), 1);
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 1);

    let stats = pipeline.stats();
    assert_eq!(stats.delivered_fallback, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn both_endpoints_failing_drops_the_fix() {
    let (base_url, backend) = spawn_backend(Script::ServerError, Script::Reject).await;
    let (primary, fallback) = reporters(&base_url);
    let pipeline = PublishPipeline::new(primary, fallback, None, 4);
    let mut outcomes = pipeline.subscribe_outcomes();

    assert!(pipeline.enqueue(request(42)));

    match outcomes.recv().await.unwrap() {
        DeliveryOutcome::Failed {
            primary_error,
            fallback_error,
            ..
        } => {
            assert!(primary_error.contains("500"), "primary_error: {primary_error}");
            assert!(fallback_error.contains("rejected"), "fallback_error: {fallback_error}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // No retry of either endpoint.
    pipeline.shutdown().await;
    assert_eq!(backend.primary_hits.load(Ordering::SeqCst), 1);
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.stats().failed, 1);
}

#[tokio::test]
async fn accepted_primary_never_touches_fallback() {
    let (base_url, backend) = spawn_backend(Script::Accept, Script::Accept).await;
    let (primary, fallback) = reporters(&base_url);
    let pipeline = PublishPipeline::new(primary, fallback, None, 4);
    let mut outcomes = pipeline.subscribe_outcomes();

    for order_id in 0..3 {
        assert!(pipeline.enqueue(request(order_id)));
    }
    for _ in 0..3 {
        let outcome = outcomes.recv().await.unwrap();
        assert!(
            matches!(outcome, DeliveryOutcome::Delivered { via: Endpoint::Primary, .. }),
            "unexpected outcome {outcome:?}"
        );
    }

    assert_eq!(backend.primary_hits.load(Ordering::SeqCst), 3);
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.stats().delivered_primary, 3);
}
