//! Distributed trace propagation.
//!
//! A `TraceInfo` lives in a `tokio::task_local!` slot that inherits into
//! explicitly-spawned children (see [`spawn_traced`]). Spans are published to
//! the existing Redis sink in [`crate::tracing_publish`] in completion order;
//! the causal tree is reconstructed downstream purely from `parent_span_id`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::propagate_header_prefixes;

tokio::task_local! {
    static CURRENT_TRACE: std::cell::RefCell<Option<TraceInfo>>;
}

/// Identity of the agent attached to every published span.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub agent_id: String,
    pub agent_name: String,
    pub agent_namespace: String,
    pub agent_endpoint: String,
    pub runtime: String,
}

static AGENT_CONTEXT: OnceLock<AgentContext> = OnceLock::new();

/// Record the agent identity used to stamp every span published from this process.
/// Safe to call more than once; only the first call takes effect.
pub fn set_agent_context(ctx: AgentContext) {
    let _ = AGENT_CONTEXT.set(ctx);
}

fn agent_context() -> Option<&'static AgentContext> {
    AGENT_CONTEXT.get()
}

/// A point in the trace tree: which trace it belongs to, its own span id, and
/// its parent (`None` for a root span).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub start_epoch_ms: u64,
}

fn new_id(byte_len: usize) -> String {
    let uuid = Uuid::new_v4();
    let hex = uuid.simple().to_string();
    hex[..byte_len * 2].to_string()
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl TraceInfo {
    /// A fresh root span: new trace id, new span id, no parent.
    pub fn root() -> Self {
        Self {
            trace_id: new_id(16),
            span_id: new_id(8),
            parent_span_id: None,
            start_epoch_ms: now_epoch_ms(),
        }
    }

    /// A child of `self`: same trace, new span id, parented on `self.span_id`.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_id(8),
            parent_span_id: Some(self.span_id.clone()),
            start_epoch_ms: now_epoch_ms(),
        }
    }
}

/// The trace context active on the current task, if any.
pub fn current() -> Option<TraceInfo> {
    CURRENT_TRACE
        .try_with(|c| c.borrow().clone())
        .unwrap_or(None)
}

/// The trace context that a new root/child span should attach to: whatever is
/// active on the current task, or a fresh root if nothing is.
fn current_or_root() -> TraceInfo {
    current().unwrap_or_else(TraceInfo::root)
}

/// Outbound propagation headers for the currently active trace context.
///
/// Always includes `x-trace-id`/`x-span-id`/`x-parent-span-id` (the latter
/// omitted when there is no parent); additionally forwards any header in
/// `extra` whose name matches a configured prefix allowlist.
pub fn outbound_headers(extra: &HashMap<String, String>) -> HashMap<String, String> {
    let info = current_or_root();
    let mut headers = HashMap::new();
    headers.insert("x-trace-id".to_string(), info.trace_id);
    headers.insert("x-span-id".to_string(), info.span_id);
    if let Some(parent) = info.parent_span_id {
        headers.insert("x-parent-span-id".to_string(), parent);
    }

    let prefixes = propagate_header_prefixes();
    for (name, value) in extra {
        if prefixes.iter().any(|p| name.to_lowercase().starts_with(p)) {
            headers.insert(name.clone(), value.clone());
        }
    }

    headers
}

/// Seed the task-local trace context from inbound request headers, falling
/// back to a fresh root span if none are present.
pub fn from_inbound_headers(headers: &HashMap<String, String>) -> TraceInfo {
    let trace_id = headers.get("x-trace-id").cloned();
    let span_id = headers.get("x-span-id").cloned();
    let parent_span_id = headers.get("x-parent-span-id").cloned();

    match (trace_id, span_id) {
        (Some(trace_id), Some(span_id)) => TraceInfo {
            trace_id,
            span_id,
            parent_span_id,
            start_epoch_ms: now_epoch_ms(),
        },
        _ => TraceInfo::root(),
    }
}

/// Typed span record matching the published field set. Converts to the
/// `HashMap<String, String>` shape [`crate::tracing_publish::publish_span`] accepts.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span: Option<String>,
    pub function_name: String,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub result_type: Option<String>,
}

impl SpanRecord {
    pub fn into_map(self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("trace_id".to_string(), self.trace_id);
        map.insert("span_id".to_string(), self.span_id);
        if let Some(parent) = self.parent_span {
            map.insert("parent_span".to_string(), parent);
        }
        map.insert("function_name".to_string(), self.function_name);
        map.insert("start_time".to_string(), self.start_time.to_string());
        map.insert("end_time".to_string(), self.end_time.to_string());
        map.insert("duration_ms".to_string(), self.duration_ms.to_string());
        map.insert("success".to_string(), self.success.to_string());
        if let Some(error) = self.error {
            map.insert("error".to_string(), error);
        }
        if let Some(error_type) = self.error_type {
            map.insert("error_type".to_string(), error_type);
        }
        if let Some(result_type) = self.result_type {
            map.insert("result_type".to_string(), result_type);
        }

        if let Some(ctx) = agent_context() {
            map.insert("agent_id".to_string(), ctx.agent_id.clone());
            map.insert("agent_name".to_string(), ctx.agent_name.clone());
            map.insert("agent_namespace".to_string(), ctx.agent_namespace.clone());
            map.insert("agent_endpoint".to_string(), ctx.agent_endpoint.clone());
            map.insert("runtime".to_string(), ctx.runtime.clone());
        }

        if let Ok(pod_name) = std::env::var("POD_NAME") {
            map.insert("pod_name".to_string(), pod_name);
        }
        if let Ok(pod_ip) = std::env::var("POD_IP") {
            map.insert("pod_ip".to_string(), pod_ip);
        }
        if let Ok(pod_namespace) = std::env::var("POD_NAMESPACE") {
            map.insert("pod_namespace".to_string(), pod_namespace);
        }

        map
    }
}

/// Run `fut` as a child span named `function_name`, publishing the result on
/// completion. Assumes success (use [`traced_result`] when `fut` yields a
/// `Result` and failure should be recorded).
pub async fn traced<T, F>(function_name: impl Into<String>, fut: F) -> T
where
    F: Future<Output = T>,
{
    let child = current_or_root();
    let name = function_name.into();
    let start = std::time::Instant::now();

    let result = CURRENT_TRACE
        .scope(std::cell::RefCell::new(Some(child.clone())), fut)
        .await;

    publish_completed_span(&child, name, start.elapsed().as_millis() as u64, true, None, None, None).await;
    result
}

/// Like [`traced`], but for futures producing a `Result` — records `success =
/// false` and the error's `Display`/type name when `fut` resolves to `Err`.
pub async fn traced_result<T, E, F>(function_name: impl Into<String>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let child = current_or_root();
    let name = function_name.into();
    let start = std::time::Instant::now();

    let result = CURRENT_TRACE
        .scope(std::cell::RefCell::new(Some(child.clone())), fut)
        .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => {
            publish_completed_span(&child, name, duration_ms, true, None, None, Some("ok".to_string())).await;
        }
        Err(e) => {
            publish_completed_span(
                &child,
                name,
                duration_ms,
                false,
                Some(e.to_string()),
                Some(std::any::type_name::<E>().to_string()),
                None,
            )
            .await;
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn publish_completed_span(
    info: &TraceInfo,
    function_name: String,
    duration_ms: u64,
    success: bool,
    error: Option<String>,
    error_type: Option<String>,
    result_type: Option<String>,
) {
    let end_time = now_epoch_ms();
    let record = SpanRecord {
        trace_id: info.trace_id.clone(),
        span_id: info.span_id.clone(),
        parent_span: info.parent_span_id.clone(),
        function_name,
        start_time: info.start_epoch_ms,
        end_time,
        duration_ms,
        success,
        error,
        error_type,
        result_type,
    };
    // Tracing must never block or crash user code: publish_span already
    // swallows its own failures, so there's nothing else to handle here.
    let _ = crate::tracing_publish::publish_span(record.into_map()).await;
}

/// Spawn `fut` onto the runtime, re-seeding the spawned task with whatever
/// trace context is active on the spawning task. Plain `tokio::spawn` does
/// not do this — task-local values don't cross a spawn boundary on their own.
pub fn spawn_traced<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let inherited = current();
    tokio::spawn(async move {
        CURRENT_TRACE
            .scope(std::cell::RefCell::new(inherited), fut)
            .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_parent() {
        let root = TraceInfo::root();
        assert!(root.parent_span_id.is_none());
        assert!(!root.trace_id.is_empty());
        assert!(!root.span_id.is_empty());
    }

    #[test]
    fn child_shares_trace_id_and_parents_on_span() {
        let root = TraceInfo::root();
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id, Some(root.span_id.clone()));
        assert_ne!(child.span_id, root.span_id);
    }

    #[test]
    fn from_inbound_headers_without_headers_is_a_fresh_root() {
        let info = from_inbound_headers(&HashMap::new());
        assert!(info.parent_span_id.is_none());
    }

    #[test]
    fn from_inbound_headers_with_headers_preserves_ids() {
        let mut headers = HashMap::new();
        headers.insert("x-trace-id".to_string(), "trace-1".to_string());
        headers.insert("x-span-id".to_string(), "span-1".to_string());
        headers.insert("x-parent-span-id".to_string(), "span-0".to_string());

        let info = from_inbound_headers(&headers);
        assert_eq!(info.trace_id, "trace-1");
        assert_eq!(info.span_id, "span-1");
        assert_eq!(info.parent_span_id, Some("span-0".to_string()));
    }

    #[tokio::test]
    async fn traced_records_a_child_of_the_current_context() {
        let result = traced("outer", async {
            let during = current().expect("span context active during traced future");
            assert!(during.parent_span_id.is_none());
            traced("inner", async {
                let nested = current().expect("nested span context active");
                assert_eq!(nested.parent_span_id, Some(during.span_id.clone()));
                42
            })
            .await
        })
        .await;
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn traced_result_records_failure_without_panicking() {
        let result: Result<(), String> = traced_result("boom", async { Err("kaboom".to_string()) }).await;
        assert!(result.is_err());
    }

    #[test]
    fn span_record_into_map_carries_required_fields() {
        let record = SpanRecord {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span: None,
            function_name: "get_date".to_string(),
            start_time: 1000,
            end_time: 1010,
            duration_ms: 10,
            success: true,
            error: None,
            error_type: None,
            result_type: Some("string".to_string()),
        };
        let map = record.into_map();
        assert_eq!(map.get("function_name").unwrap(), "get_date");
        assert_eq!(map.get("success").unwrap(), "true");
        assert!(!map.contains_key("parent_span"));
    }
}
