//! Black-box HTTP tests against the built router, exercised as an external
//! consumer of the `mesh_registry` library crate (companion to the inline
//! `#[cfg(test)]` handlers in `src/api.rs`, which cover the late-binding and
//! agent-removal scenarios). These two cover idempotent re-registration and
//! the conflicting-registration 409 path end-to-end over HTTP.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use mesh_registry::api::{build_router, AppState, ReadinessState};
use mesh_registry::events::EventBroadcaster;
use mesh_registry::model::HeartbeatResponse;
use mesh_registry::store::Store;
use mesh_registry::trace_sink::TraceSink;

fn state() -> AppState {
    let readiness = Arc::new(ReadinessState::default());
    readiness.mark_ready();
    AppState {
        store: Arc::new(Store::new()),
        events: Arc::new(EventBroadcaster::new()),
        trace_sink: Arc::new(TraceSink::new("redis://127.0.0.1:1".to_string())),
        readiness,
    }
}

fn register_request(agent_id: &str, name: &str, content_hash: &str) -> Request<Body> {
    let body = json!({
        "agent_id": agent_id,
        "name": name,
        "version": "1.0.0",
        "http_host": "localhost",
        "http_port": 9000,
        "namespace": "default",
        "status": "healthy",
        "tools": [{
            "function_name": "greet",
            "capability": "greeting",
            "version": "1.0.0",
            "tags": [],
            "dependencies": [],
        }],
        "content_hash": content_hash,
    });
    Request::builder()
        .method("POST")
        .uri("/agents")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn identical_reregistration_is_idempotent_and_resource_version_is_unchanged() {
    let router = build_router(state());

    let resp = router.clone().oneshot(register_request("hello", "hello", "hash-a")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let first: HeartbeatResponse = serde_json::from_slice(&body).unwrap();

    let resp = router.oneshot(register_request("hello", "hello", "hash-a")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let second: HeartbeatResponse = serde_json::from_slice(&body).unwrap();

    assert_eq!(first.resource_version, second.resource_version);
}

#[tokio::test]
async fn reregistration_with_new_content_hash_advances_resource_version() {
    let router = build_router(state());

    let resp = router.clone().oneshot(register_request("hello", "hello", "hash-a")).await.unwrap();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let first: HeartbeatResponse = serde_json::from_slice(&body).unwrap();

    let resp = router.oneshot(register_request("hello", "hello", "hash-b")).await.unwrap();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let second: HeartbeatResponse = serde_json::from_slice(&body).unwrap();

    assert!(second.resource_version > first.resource_version);
}

#[tokio::test]
async fn conflicting_agent_id_for_same_namespace_name_is_rejected_with_409() {
    let router = build_router(state());

    let resp = router.clone().oneshot(register_request("hello-v1", "hello", "hash-a")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = router.oneshot(register_request("hello-v2", "hello", "hash-b")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"], "CONFLICT");
}
