//! Wire and storage types for the registry.
//!
//! The request/response shapes here are the server-side mirror of
//! `mesh-core::registry`'s client types — field names, `rename`s and
//! `skip_serializing_if` must match exactly, since an agent's `HeartbeatRequest`
//! is what we deserialize and our `HeartbeatResponse` is what it deserializes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Health/lifecycle status of a registered agent (data model §3).
///
/// `Pending` exists only between `POST /agents` accepting a record and the
/// first successful heartbeat; every other transition is driven by
/// [`crate::health`]'s sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Offline => "offline",
        }
    }

    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "healthy" => Self::Healthy,
            "degraded" => Self::Degraded,
            "unhealthy" => Self::Unhealthy,
            "offline" => Self::Offline,
            _ => Self::Pending,
        }
    }

    /// Candidates in this status are eligible for resolution (invariant 2).
    pub fn is_resolvable(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Dependency declaration nested in a [`ToolRegistration`], as sent by an agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependencyRegistration {
    pub capability: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// One tool's registration entry, nested in a [`HeartbeatRequest`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolRegistration {
    pub function_name: String,
    pub capability: String,
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRegistration>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub llm_filter: Option<serde_json::Value>,
    #[serde(default)]
    pub llm_provider: Option<serde_json::Value>,
}

/// Body of `POST /agents` and `POST /agents/{id}/heartbeat`.
///
/// Deserializes exactly what `mesh_core::registry::HeartbeatRequest` serializes.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    pub http_host: String,
    pub http_port: u16,
    pub namespace: String,
    pub status: String,
    #[serde(default)]
    pub tools: Vec<ToolRegistration>,
    /// Defaults to 5s for agents predating this field, matching the health
    /// monitor's prior hardcoded fallback.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    pub content_hash: String,
}

fn default_heartbeat_interval() -> u64 {
    5
}

impl HeartbeatRequest {
    pub fn agent_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.agent_id)
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.http_host, self.http_port)
    }
}

/// Resolved dependency entry embedded in a [`HeartbeatResponse`].
///
/// Serializes exactly what `mesh_core::registry::ResolvedDependency` deserializes.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDependency {
    pub agent_id: String,
    pub endpoint: String,
    pub function_name: String,
    pub capability: String,
    pub status: String,
    pub ttl: u64,
}

/// One LLM-callable tool entry, as exposed to an `@mesh.llm` consumer.
#[derive(Debug, Clone, Serialize)]
pub struct LlmToolInfo {
    #[serde(rename = "name")]
    pub function_name: String,
    pub capability: String,
    pub endpoint: String,
    pub agent_id: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Option<serde_json::Value>,
}

/// A resolved LLM provider (capability `"llm"`) entry.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedLlmProvider {
    pub agent_id: String,
    pub endpoint: String,
    #[serde(rename = "name")]
    pub function_name: String,
    pub model: Option<String>,
    pub capability: Option<String>,
    pub status: Option<String>,
    pub vendor: Option<String>,
    pub version: Option<String>,
}

/// Body returned by `POST /agents`, `POST /agents/{id}/heartbeat`, and the
/// topology snapshot returned by `GET /agents/{id}/topology`.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub status: String,
    pub message: String,
    pub agent_id: String,
    pub resource_version: u64,
    pub dependencies_resolved: HashMap<String, Vec<ResolvedDependency>>,
    pub llm_tools: HashMap<String, Vec<LlmToolInfo>>,
    pub llm_providers: HashMap<String, ResolvedLlmProvider>,
}

/// Resolver output: a concrete candidate for one capability (data model §3).
#[derive(Debug, Clone, Serialize)]
pub struct ToolRef {
    pub agent_id: String,
    pub endpoint: String,
    pub function_name: String,
    pub capability: String,
    pub tags: Vec<String>,
    pub version: String,
    pub input_schema: Option<serde_json::Value>,
    pub score: f64,
}

/// The authoritative per-agent record held by the store.
///
/// `AgentSpec ∪ {agent_id, endpoint, status, last_seen, resource_version}` per
/// data model §3; `tools`/`content_hash` are carried alongside so a re-heartbeat
/// can be compared without re-deriving anything from the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub http_host: String,
    pub http_port: u16,
    pub status: AgentStatus,
    /// Milliseconds since the Unix epoch; passed in rather than read from the
    /// system clock so tests can drive the health sweep deterministically.
    pub last_seen_ms: u64,
    pub resource_version: u64,
    pub heartbeat_interval_s: u64,
    pub tools: Vec<ToolRegistration>,
    pub content_hash: String,
}

impl AgentRecord {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.http_host, self.http_port)
    }

    pub fn key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }
}

/// Query parameters accepted by `GET /agents`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryQuery {
    pub capability: String,
    /// Comma-separated tag operator list, e.g. `"addition,(py|+ts)"`.
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl DiscoveryQuery {
    pub fn tags_vec(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .map(|s| s.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Query parameters accepted by `GET /events`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: Option<u64>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_status_round_trips_through_api_strings() {
        for s in [
            AgentStatus::Pending,
            AgentStatus::Healthy,
            AgentStatus::Degraded,
            AgentStatus::Unhealthy,
            AgentStatus::Offline,
        ] {
            assert_eq!(AgentStatus::from_str_lenient(s.as_str()), s);
        }
    }

    #[test]
    fn only_healthy_and_degraded_are_resolvable() {
        assert!(AgentStatus::Healthy.is_resolvable());
        assert!(AgentStatus::Degraded.is_resolvable());
        assert!(!AgentStatus::Pending.is_resolvable());
        assert!(!AgentStatus::Unhealthy.is_resolvable());
        assert!(!AgentStatus::Offline.is_resolvable());
    }

    #[test]
    fn discovery_query_splits_tags_on_comma() {
        let q = DiscoveryQuery {
            capability: "math".to_string(),
            tags: Some("addition,(py|+ts)".to_string()),
            version: None,
            namespace: None,
            mode: None,
        };
        assert_eq!(q.tags_vec(), vec!["addition".to_string(), "(py|+ts)".to_string()]);
    }

    #[test]
    fn heartbeat_request_deserializes_client_shape() {
        let body = serde_json::json!({
            "agent_id": "hello",
            "name": "hello",
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
            "content_hash": "abc123",
        });
        let req: HeartbeatRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.agent_id, "hello");
        assert_eq!(req.tools.len(), 1);
        assert_eq!(req.tools[0].function_name, "greet");
    }
}
