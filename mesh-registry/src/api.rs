//! HTTP surface for the registry (§4.1/§6).
//!
//! `AppState`/`Router` shape grounded on the gateway template's
//! `AppState`/`readiness_probe`/`IntoResponse` pattern, specialized to the
//! mesh's own endpoints instead of a generic request-routing gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, head, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::now_ms;
use crate::error::{ApiError, StoreError};
use crate::events::{EventBroadcaster, TopologyEvent, TopologyEventKind};
use crate::model::{
    AgentRecord, DiscoveryQuery, EventsQuery, HeartbeatRequest, HeartbeatResponse, LlmToolInfo,
    ResolvedDependency, ResolvedLlmProvider, ToolRef,
};
use crate::resolver::{self, FilterMode};
use crate::store::Store;
use crate::trace_sink::{SpanRecord, TraceSink};

/// Long-poll wait budget for `GET /events` before returning an empty batch.
const EVENTS_POLL_TIMEOUT: Duration = Duration::from_secs(25);

/// Readiness flag: false until the store has finished initializing (§6).
#[derive(Default)]
pub struct ReadinessState {
    ready: AtomicBool,
}

impl ReadinessState {
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub events: Arc<EventBroadcaster>,
    pub trace_sink: Arc<TraceSink>,
    pub readiness: Arc<ReadinessState>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/agents", post(register_agent))
        .route("/agents", get(discover_agents))
        .route("/agents/:id", head(touch_agent))
        .route("/agents/:id", delete(unregister_agent))
        .route("/agents/:id/heartbeat", post(heartbeat_agent))
        .route("/agents/:id/topology", get(agent_topology))
        .route("/events", get(list_events))
        .route("/traces", post(ingest_traces))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Deterministic conversion shared by every handler that returns the
/// full resolved-topology snapshot for an agent (register/heartbeat/topology).
fn build_heartbeat_response(store: &Store, record: &AgentRecord) -> Result<HeartbeatResponse, ApiError> {
    let mut dependencies_resolved = std::collections::HashMap::new();
    let mut llm_tools = std::collections::HashMap::new();
    let mut llm_providers = std::collections::HashMap::new();

    for tool in &record.tools {
        for dep in &tool.dependencies {
            if dependencies_resolved.contains_key(&dep.capability) {
                continue;
            }
            let resolved = resolver::resolve(
                store,
                &dep.capability,
                &dep.tags,
                dep.version.as_deref(),
                FilterMode::All,
            )?;
            let refs: Vec<ResolvedDependency> = resolved
                .into_iter()
                .map(|r| ResolvedDependency {
                    agent_id: r.agent_id,
                    endpoint: r.endpoint,
                    function_name: r.function_name,
                    capability: r.capability,
                    status: "healthy".to_string(),
                    ttl: record.heartbeat_interval_s * 2,
                })
                .collect();
            dependencies_resolved.insert(dep.capability.clone(), refs);
        }

        if let Some(filter) = &tool.llm_filter {
            let entries = parse_llm_filter(filter);
            let mut tools_for_fn = Vec::new();
            for entry in entries {
                let resolved = resolver::resolve(
                    store,
                    &entry.capability,
                    &entry.tags,
                    entry.version_constraint.as_deref(),
                    FilterMode::parse(entry.filter_mode.as_deref()),
                )?;
                tools_for_fn.extend(resolved.into_iter().map(tool_ref_to_llm_tool_info));
            }
            llm_tools.insert(tool.function_name.clone(), tools_for_fn);
        }

        if let Some(provider) = &tool.llm_provider {
            if let Some(selector) = parse_llm_provider(provider) {
                let resolved = resolver::resolve(
                    store,
                    selector.capability.as_deref().unwrap_or("llm"),
                    &selector.tags,
                    selector.version_constraint.as_deref(),
                    FilterMode::BestMatch,
                )?;
                if let Some(top) = resolved.into_iter().next() {
                    llm_providers.insert(tool.function_name.clone(), tool_ref_to_provider(top));
                }
            }
        }
    }

    Ok(HeartbeatResponse {
        status: "ok".to_string(),
        message: "registered".to_string(),
        agent_id: record.agent_id.clone(),
        resource_version: record.resource_version,
        dependencies_resolved,
        llm_tools,
        llm_providers,
    })
}

fn tool_ref_to_llm_tool_info(r: ToolRef) -> LlmToolInfo {
    LlmToolInfo {
        function_name: r.function_name,
        capability: r.capability,
        endpoint: r.endpoint,
        agent_id: r.agent_id,
        input_schema: r.input_schema,
    }
}

fn tool_ref_to_provider(r: ToolRef) -> ResolvedLlmProvider {
    ResolvedLlmProvider {
        agent_id: r.agent_id,
        endpoint: r.endpoint,
        function_name: r.function_name,
        model: None,
        capability: Some(r.capability),
        status: Some("healthy".to_string()),
        vendor: None,
        version: Some(r.version),
    }
}

#[derive(Debug, Deserialize, Default)]
struct LlmFilterEntry {
    capability: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    version_constraint: Option<String>,
    #[serde(default)]
    filter_mode: Option<String>,
}

fn parse_llm_filter(raw: &serde_json::Value) -> Vec<LlmFilterEntry> {
    serde_json::from_value::<Vec<LlmFilterEntry>>(raw.clone()).unwrap_or_default()
}

#[derive(Debug, Deserialize, Default)]
struct LlmProviderSelector {
    #[serde(default)]
    capability: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    version_constraint: Option<String>,
}

fn parse_llm_provider(raw: &serde_json::Value) -> Option<LlmProviderSelector> {
    serde_json::from_value::<LlmProviderSelector>(raw.clone()).ok()
}

fn publish_registration_event(state: &AppState, record: &AgentRecord, changed: bool) {
    if !changed {
        return;
    }
    state.events.publish(TopologyEvent {
        resource_version: record.resource_version,
        namespace: record.namespace.clone(),
        agent_id: record.agent_id.clone(),
        capability: None,
        kind: TopologyEventKind::AgentRegistered,
    });
    for tool in &record.tools {
        state.events.publish(TopologyEvent {
            resource_version: record.resource_version,
            namespace: record.namespace.clone(),
            agent_id: record.agent_id.clone(),
            capability: Some(tool.capability.clone()),
            kind: TopologyEventKind::AgentUpdated,
        });
    }
}

async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (record, changed) = state.store.register(&req, now_ms())?;
    publish_registration_event(&state, &record, changed);
    info!(agent_id = %record.agent_id, resource_version = record.resource_version, "agent registered");
    let body = build_heartbeat_response(&state.store, &record)?;
    Ok((StatusCode::CREATED, Json(body)))
}

async fn heartbeat_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if id != req.agent_id {
        return Err(ApiError::BadRequest(format!(
            "path agent id '{id}' does not match body agent id '{}'",
            req.agent_id
        )));
    }
    if state.store.get(&id).is_none() {
        return Err(StoreError::AgentNotFound(id).into());
    }

    let (record, changed) = state.store.register(&req, now_ms())?;
    publish_registration_event(&state, &record, changed);
    let body = build_heartbeat_response(&state.store, &record)?;
    Ok((StatusCode::OK, Json(body)))
}

async fn touch_agent(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.store.touch(&id, now_ms()) {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn unregister_agent(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.store.remove(&id) {
        Some(record) => {
            state.events.publish(TopologyEvent {
                resource_version: state.store.current_resource_version(),
                namespace: record.namespace,
                agent_id: record.agent_id,
                capability: None,
                kind: TopologyEventKind::AgentRemoved,
            });
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn discover_agents(
    State(state): State<AppState>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<Json<Vec<ToolRef>>, ApiError> {
    if query.capability.trim().is_empty() {
        return Err(ApiError::BadRequest("capability query parameter is required".to_string()));
    }
    let mode = FilterMode::parse(query.mode.as_deref());
    let refs = resolver::resolve(&state.store, &query.capability, &query.tags_vec(), query.version.as_deref(), mode)?;
    Ok(Json(refs))
}

async fn agent_topology(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let record = state.store.get(&id).ok_or_else(|| StoreError::AgentNotFound(id.clone()))?;
    let body = build_heartbeat_response(&state.store, &record)?;
    Ok(Json(body))
}

async fn list_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Json<Vec<TopologyEvent>> {
    let since = query.since.unwrap_or(0);
    let events = state.events.poll(since, EVENTS_POLL_TIMEOUT).await;
    let filtered = match &query.namespace {
        Some(ns) => events.into_iter().filter(|e| &e.namespace == ns).collect(),
        None => events,
    };
    Json(filtered)
}

async fn ingest_traces(State(state): State<AppState>, Json(spans): Json<Vec<SpanRecord>>) -> impl IntoResponse {
    let accepted = state.trace_sink.accept_batch(&spans).await;
    Json(json!({ "accepted": accepted, "submitted": spans.len() }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not_ready" })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let readiness = Arc::new(ReadinessState::default());
        readiness.mark_ready();
        AppState {
            store: Arc::new(Store::new()),
            events: Arc::new(EventBroadcaster::new()),
            trace_sink: Arc::new(TraceSink::new("redis://127.0.0.1:1".to_string())),
            readiness,
        }
    }

    fn heartbeat_body(agent_id: &str, content_hash: &str) -> serde_json::Value {
        json!({
            "agent_id": agent_id,
            "name": agent_id,
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
                "dependencies": [{"capability": "date", "tags": [], "version": null}],
            }],
            "content_hash": content_hash,
        })
    }

    #[tokio::test]
    async fn health_and_ready_report_ok() {
        let router = build_router(test_state());

        let resp = router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_then_discover_returns_registered_agent() {
        let router = build_router(test_state());

        let register_req = Request::builder()
            .method("POST")
            .uri("/agents")
            .header("content-type", "application/json")
            .body(Body::from(heartbeat_body("hello", "hash-a").to_string()))
            .unwrap();
        let resp = router.clone().oneshot(register_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        // Scenario A: no provider registered yet for "date" -> empty resolution.
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let parsed: HeartbeatResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.dependencies_resolved.get("date").unwrap().is_empty());

        let discover_req = Request::builder()
            .uri("/agents?capability=greeting")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(discover_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let refs: Vec<ToolRef> = serde_json::from_slice(&body).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].agent_id, "hello");
    }

    #[tokio::test]
    async fn late_binding_injection_resolves_once_provider_registers_scenario_a() {
        let state = test_state();
        let router = build_router(state.clone());

        router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(heartbeat_body("hello", "hash-a").to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let provider = json!({
            "agent_id": "sys",
            "name": "sys",
            "version": "1.0.0",
            "http_host": "localhost",
            "http_port": 9100,
            "namespace": "default",
            "status": "healthy",
            "tools": [{
                "function_name": "get_date",
                "capability": "date",
                "version": "1.0.0",
                "tags": [],
                "dependencies": [],
            }],
            "content_hash": "hash-sys",
        });
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(provider.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let resp = router
            .oneshot(Request::builder().uri("/agents/hello/topology").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let parsed: HeartbeatResponse = serde_json::from_slice(&body).unwrap();
        let date_deps = parsed.dependencies_resolved.get("date").unwrap();
        assert_eq!(date_deps.len(), 1);
        assert_eq!(date_deps[0].agent_id, "sys");
    }

    #[tokio::test]
    async fn unregister_then_head_returns_404_scenario_e_cleanup() {
        let router = build_router(test_state());
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(heartbeat_body("hello", "hash-a").to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let resp = router
            .clone()
            .oneshot(Request::builder().method("DELETE").uri("/agents/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = router
            .oneshot(Request::builder().method("HEAD").uri("/agents/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_agent_is_404() {
        let router = build_router(test_state());
        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/ghost/heartbeat")
                    .header("content-type", "application/json")
                    .body(Body::from(heartbeat_body("ghost", "hash-a").to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn discover_without_capability_is_bad_request() {
        let router = build_router(test_state());
        let resp = router
            .oneshot(Request::builder().uri("/agents").body(Body::empty()).unwrap())
            .await;
        // Missing required query param fails axum's `Query` extraction itself
        // (400), before our handler's own empty-capability check ever runs.
        assert!(resp.is_err() || resp.unwrap().status() == StatusCode::BAD_REQUEST);
    }
}
