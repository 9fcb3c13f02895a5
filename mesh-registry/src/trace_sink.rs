//! Span-stream sink backing the "`XADD mesh:trace` semantic endpoint" of §4.1.
//!
//! Pure fan-out: the registry never reads spans back, it just forwards
//! accepted batches to the downstream tracing store. Grounded on
//! `mesh_core::tracing_publish`'s `XADD`-based publisher, generalized from a
//! single `HashMap<String,String>` span to a batch of typed `SpanRecord`s
//! (the registry's batches come over HTTP, not from an in-process caller).
//!
//! Failures are swallowed per §4.6 — tracing must never fail a caller's
//! request — and logged at debug only.

use std::collections::HashMap;

use redis::AsyncCommands;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const TRACE_STREAM_NAME: &str = "mesh:trace";

/// One span, matching the field set enumerated in §6 "Span stream record".
#[derive(Debug, Clone, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span: Option<String>,
    pub function_name: String,
    pub start_time: f64,
    pub end_time: f64,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub result_type: Option<String>,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_namespace: String,
    pub agent_endpoint: String,
    #[serde(default)]
    pub pod_name: Option<String>,
    #[serde(default)]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub pod_namespace: Option<String>,
    pub runtime: String,
}

impl SpanRecord {
    fn to_field_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("trace_id".to_string(), self.trace_id.clone());
        m.insert("span_id".to_string(), self.span_id.clone());
        if let Some(parent) = &self.parent_span {
            m.insert("parent_span".to_string(), parent.clone());
        }
        m.insert("function_name".to_string(), self.function_name.clone());
        m.insert("start_time".to_string(), self.start_time.to_string());
        m.insert("end_time".to_string(), self.end_time.to_string());
        m.insert("duration_ms".to_string(), self.duration_ms.to_string());
        m.insert("success".to_string(), self.success.to_string());
        if let Some(v) = &self.error {
            m.insert("error".to_string(), v.clone());
        }
        if let Some(v) = &self.error_type {
            m.insert("error_type".to_string(), v.clone());
        }
        if let Some(v) = &self.result_type {
            m.insert("result_type".to_string(), v.clone());
        }
        m.insert("agent_id".to_string(), self.agent_id.clone());
        m.insert("agent_name".to_string(), self.agent_name.clone());
        m.insert("agent_namespace".to_string(), self.agent_namespace.clone());
        m.insert("agent_endpoint".to_string(), self.agent_endpoint.clone());
        if let Some(v) = &self.pod_name {
            m.insert("pod_name".to_string(), v.clone());
        }
        if let Some(v) = &self.pod_ip {
            m.insert("pod_ip".to_string(), v.clone());
        }
        if let Some(v) = &self.pod_namespace {
            m.insert("pod_namespace".to_string(), v.clone());
        }
        m.insert("runtime".to_string(), self.runtime.clone());
        m
    }
}

struct TraceSinkState {
    client: Option<redis::Client>,
}

/// Lazily-connected Redis XADD sink, shared via `AppState`.
pub struct TraceSink {
    redis_url: String,
    state: RwLock<TraceSinkState>,
}

impl TraceSink {
    pub fn new(redis_url: String) -> Self {
        Self {
            redis_url,
            state: RwLock::new(TraceSinkState { client: None }),
        }
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        {
            let state = self.state.read().await;
            if let Some(client) = &state.client {
                if let Ok(conn) = client.get_multiplexed_async_connection().await {
                    return Some(conn);
                }
            }
        }

        let client = match redis::Client::open(self.redis_url.as_str()) {
            Ok(c) => c,
            Err(e) => {
                debug!("trace sink: failed to build redis client: {}", e);
                return None;
            }
        };
        let conn = client.get_multiplexed_async_connection().await.ok();
        let mut state = self.state.write().await;
        state.client = Some(client);
        conn
    }

    /// Accept a batch of spans, best-effort. Never returns an error to the
    /// caller — a failed publish is logged and dropped, matching `TracingFailure`
    /// never being surfaced (§7).
    pub async fn accept_batch(&self, spans: &[SpanRecord]) -> usize {
        let mut accepted = 0;
        let Some(mut conn) = self.connection().await else {
            warn!("trace sink: redis unavailable, dropping {} span(s)", spans.len());
            return 0;
        };

        for span in spans {
            let fields = span.to_field_map();
            let items: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let result: Result<String, redis::RedisError> = conn.xadd(TRACE_STREAM_NAME, "*", &items).await;
            match result {
                Ok(_) => accepted += 1,
                Err(e) => debug!("trace sink: failed to publish span {}: {}", span.span_id, e),
            }
        }

        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_span() -> SpanRecord {
        SpanRecord {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span: None,
            function_name: "greet".to_string(),
            start_time: 0.0,
            end_time: 1.0,
            duration_ms: 1.0,
            success: true,
            error: None,
            error_type: None,
            result_type: Some("string".to_string()),
            agent_id: "hello".to_string(),
            agent_name: "hello".to_string(),
            agent_namespace: "default".to_string(),
            agent_endpoint: "http://localhost:9000".to_string(),
            pod_name: None,
            pod_ip: None,
            pod_namespace: None,
            runtime: "py".to_string(),
        }
    }

    #[test]
    fn field_map_carries_required_fields_and_skips_absent_optionals() {
        let span = sample_span();
        let map = span.to_field_map();
        assert_eq!(map.get("trace_id"), Some(&"t1".to_string()));
        assert_eq!(map.get("function_name"), Some(&"greet".to_string()));
        assert!(!map.contains_key("parent_span"));
        assert!(!map.contains_key("error"));
        assert_eq!(map.get("result_type"), Some(&"string".to_string()));
    }

    #[tokio::test]
    async fn accept_batch_returns_zero_when_redis_is_unreachable() {
        let sink = TraceSink::new("redis://127.0.0.1:1".to_string());
        let accepted = sink.accept_batch(&[sample_span()]).await;
        assert_eq!(accepted, 0);
    }
}
