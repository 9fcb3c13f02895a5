//! Dependency proxy invoker.
//!
//! Holds the runtime's view of "what do I call when a tool reaches for a
//! resolved dependency": either an in-process handler (self-dependency
//! shortcut) or an HTTP client pointed at a peer agent's `/tools/call`
//! endpoint. The table is a copy-on-write `ArcSwap` snapshot so callers on
//! the hot path never take a lock to read it; updates (driven by heartbeat
//! topology diffs in `runtime.rs`) swap in a whole new snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::spec::ProxyOptions;

/// Errors raised by the proxy invoker.
#[derive(Debug, Error, Clone)]
pub enum ProxyError {
    #[error("no proxy bound for capability '{capability}'")]
    ToolUnavailable { capability: String },

    #[error("call to '{function_name}' (capability '{capability}') failed: {cause}")]
    ToolCallFailed {
        capability: String,
        function_name: String,
        cause: String,
    },
}

/// A locally-registered tool handler, used for the self-dependency shortcut:
/// when an agent depends on a capability it provides itself, the call never
/// leaves the process.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, String>;
}

/// What a proxy table slot resolves to.
pub enum ProxyTarget {
    Local(Arc<dyn LocalHandler>),
    Remote { endpoint: String, function_name: String },
}

impl Clone for ProxyTarget {
    fn clone(&self) -> Self {
        match self {
            ProxyTarget::Local(handler) => ProxyTarget::Local(handler.clone()),
            ProxyTarget::Remote { endpoint, function_name } => ProxyTarget::Remote {
                endpoint: endpoint.clone(),
                function_name: function_name.clone(),
            },
        }
    }
}

/// A resolved dependency: where to call it, and the per-call tuning from the
/// declaring tool's `ProxyOptions`.
#[derive(Clone)]
pub struct ProxyEntry {
    pub target: ProxyTarget,
    pub options: ProxyOptions,
}

/// Key identifying one dependency slot: the capability name plus the index
/// of that dependency within its declaring tool's `dependencies` list (a
/// tool can depend on the same capability more than once).
pub type SlotKey = (String, u32);

/// Lock-free, copy-on-write table of resolved dependency proxies.
pub struct ProxyInvoker {
    own_agent_id: String,
    table: ArcSwap<HashMap<SlotKey, ProxyEntry>>,
    clients: DashMap<String, Client>,
}

impl ProxyInvoker {
    pub fn new(own_agent_id: impl Into<String>) -> Self {
        Self {
            own_agent_id: own_agent_id.into(),
            table: ArcSwap::from_pointee(HashMap::new()),
            clients: DashMap::new(),
        }
    }

    /// Install or replace the proxy entry for one dependency slot.
    pub fn upsert(&self, slot: SlotKey, target: ProxyTarget, options: ProxyOptions) {
        let mut next = (**self.table.load()).clone();
        next.insert(slot, ProxyEntry { target, options });
        self.table.store(Arc::new(next));
    }

    /// Remove a proxy entry, e.g. when its backing dependency disappears.
    pub fn remove(&self, slot: &SlotKey) {
        let mut next = (**self.table.load()).clone();
        next.remove(slot);
        self.table.store(Arc::new(next));
    }

    /// Snapshot of the entry for a slot, if bound.
    fn entry(&self, slot: &SlotKey) -> Option<ProxyEntry> {
        self.table.load().get(slot).cloned()
    }

    /// Register a local handler so calls into `capability` resolve in-process
    /// rather than over HTTP, regardless of what the registry's topology says
    /// (the self-dependency shortcut from §4.3).
    pub fn register_local(&self, slot: SlotKey, handler: Arc<dyn LocalHandler>, options: ProxyOptions) {
        self.upsert(slot, ProxyTarget::Local(handler), options);
    }

    fn client_for(&self, endpoint: &str) -> Client {
        if let Some(client) = self.clients.get(endpoint) {
            return client.clone();
        }
        let client = Client::new();
        self.clients.insert(endpoint.to_string(), client.clone());
        client
    }

    /// Invoke the dependency bound to `slot` with JSON-RPC style arguments.
    ///
    /// Applies the self-dependency shortcut, the declared timeout/retry
    /// policy, and propagates the current trace context on outbound HTTP
    /// calls.
    pub async fn call(
        &self,
        slot: &SlotKey,
        arguments: Value,
    ) -> Result<Value, ProxyError> {
        let capability = slot.0.clone();
        let entry = self.entry(slot).ok_or_else(|| ProxyError::ToolUnavailable {
            capability: capability.clone(),
        })?;

        match entry.target {
            ProxyTarget::Local(handler) => handler.call(arguments).await.map_err(|cause| {
                ProxyError::ToolCallFailed {
                    capability,
                    function_name: "<local>".to_string(),
                    cause,
                }
            }),
            ProxyTarget::Remote { endpoint, function_name } => {
                self.call_remote(&capability, &endpoint, &function_name, arguments, &entry.options)
                    .await
            }
        }
    }

    async fn call_remote(
        &self,
        capability: &str,
        endpoint: &str,
        function_name: &str,
        arguments: Value,
        options: &ProxyOptions,
    ) -> Result<Value, ProxyError> {
        let client = self.client_for(endpoint);
        let url = format!("{}/tools/call", endpoint.trim_end_matches('/'));
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": function_name,
                "arguments": arguments,
            }
        });

        let mut headers = options.custom_headers.clone();
        headers.extend(crate::trace::outbound_headers(&options.custom_headers));

        let attempts = options.retry_count.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = backoff_for_attempt(attempt);
                tokio::time::sleep(backoff).await;
            }

            let mut request = client
                .post(&url)
                .json(&body)
                .timeout(Duration::from_millis(options.timeout_ms));
            for (name, value) in &headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<Value>().await.map_err(|e| ProxyError::ToolCallFailed {
                        capability: capability.to_string(),
                        function_name: function_name.to_string(),
                        cause: format!("invalid response body: {e}"),
                    });
                }
                Ok(response) => {
                    last_error = format!("http {}", response.status());
                    if !response.status().is_server_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            debug!(
                "Proxy call to {} (capability {}) attempt {}/{} failed: {}",
                function_name, capability, attempt + 1, attempts, last_error
            );
        }

        warn!(
            "Proxy call to {} (capability {}) exhausted {} attempt(s): {}",
            function_name, capability, attempts, last_error
        );
        Err(ProxyError::ToolCallFailed {
            capability: capability.to_string(),
            function_name: function_name.to_string(),
            cause: last_error,
        })
    }

    /// Invoke a dependency declared with `streaming=true`, yielding one
    /// decoded JSON chunk per Server-Sent-Event `data:` line as it arrives.
    /// Local handlers have nothing to stream, so this only supports remote
    /// targets.
    pub async fn call_streaming(
        &self,
        slot: &SlotKey,
        arguments: Value,
    ) -> Result<impl Stream<Item = Result<Value, ProxyError>>, ProxyError> {
        let capability = slot.0.clone();
        let entry = self.entry(slot).ok_or_else(|| ProxyError::ToolUnavailable {
            capability: capability.clone(),
        })?;

        let (endpoint, function_name) = match entry.target {
            ProxyTarget::Local(_) => {
                return Err(ProxyError::ToolCallFailed {
                    capability,
                    function_name: "<local>".to_string(),
                    cause: "streaming is not supported for local handlers".to_string(),
                })
            }
            ProxyTarget::Remote { endpoint, function_name } => (endpoint, function_name),
        };

        let client = self.client_for(&endpoint);
        let url = format!("{}/tools/call", endpoint.trim_end_matches('/'));
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": function_name, "arguments": arguments}
        });

        let mut headers = entry.options.custom_headers.clone();
        headers.extend(crate::trace::outbound_headers(&entry.options.custom_headers));

        let mut request = client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_millis(entry.options.timeout_ms))
            .header("accept", "text/event-stream");
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| ProxyError::ToolCallFailed {
            capability: capability.clone(),
            function_name: function_name.clone(),
            cause: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(ProxyError::ToolCallFailed {
                capability,
                function_name,
                cause: format!("http {}", response.status()),
            });
        }

        let byte_stream = response.bytes_stream();
        let state = (byte_stream, String::new(), capability, function_name);

        Ok(stream::unfold(state, |(mut bytes, mut buffer, capability, function_name)| async move {
            loop {
                if let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    if let Some(chunk) = parse_sse_data(&frame) {
                        return Some((chunk, (bytes, buffer, capability, function_name)));
                    }
                    continue;
                }

                match bytes.next().await {
                    Some(Ok(next)) => {
                        buffer.push_str(&String::from_utf8_lossy(&next));
                    }
                    Some(Err(e)) => {
                        let err = Err(ProxyError::ToolCallFailed {
                            capability: capability.clone(),
                            function_name: function_name.clone(),
                            cause: e.to_string(),
                        });
                        return Some((err, (bytes, String::new(), capability, function_name)));
                    }
                    None => {
                        if buffer.trim().is_empty() {
                            return None;
                        }
                        let leftover = std::mem::take(&mut buffer);
                        return parse_sse_data(&leftover)
                            .map(|chunk| (chunk, (bytes, String::new(), capability, function_name)));
                    }
                }
            }
        }))
    }

    /// Whether `agent_id` is this process's own agent id (the self-dependency
    /// shortcut test).
    pub fn is_self(&self, agent_id: &str) -> bool {
        agent_id == self.own_agent_id
    }
}

/// Parse one SSE event frame, returning the decoded `data:` payload if present.
fn parse_sse_data(frame: &str) -> Option<Result<Value, ProxyError>> {
    let data: String = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.trim_start())
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() {
        return None;
    }

    Some(serde_json::from_str(&data).map_err(|e| ProxyError::ToolCallFailed {
        capability: String::new(),
        function_name: String::new(),
        cause: format!("invalid SSE chunk: {e}"),
    }))
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let base_ms = 200u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let capped_ms = base_ms.min(5_000);
    let jittered = rand::thread_rng().gen_range(0.0..=1.0) * capped_ms as f64;
    Duration::from_millis(jittered as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl LocalHandler for Echo {
        async fn call(&self, arguments: Value) -> Result<Value, String> {
            Ok(arguments)
        }
    }

    #[tokio::test]
    async fn unbound_slot_is_tool_unavailable() {
        let invoker = ProxyInvoker::new("agent-1");
        let result = invoker.call(&("date".to_string(), 0), Value::Null).await;
        assert!(matches!(result, Err(ProxyError::ToolUnavailable { .. })));
    }

    #[tokio::test]
    async fn local_handler_bypasses_http() {
        let invoker = ProxyInvoker::new("agent-1");
        invoker.register_local(
            ("date".to_string(), 0),
            Arc::new(Echo),
            ProxyOptions::default(),
        );

        let result = invoker
            .call(&("date".to_string(), 0), serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[test]
    fn remove_clears_a_slot() {
        let invoker = ProxyInvoker::new("agent-1");
        let slot = ("date".to_string(), 0);
        invoker.register_local(slot.clone(), Arc::new(Echo), ProxyOptions::default());
        assert!(invoker.entry(&slot).is_some());
        invoker.remove(&slot);
        assert!(invoker.entry(&slot).is_none());
    }

    #[test]
    fn is_self_matches_own_agent_id() {
        let invoker = ProxyInvoker::new("agent-1");
        assert!(invoker.is_self("agent-1"));
        assert!(!invoker.is_self("agent-2"));
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        for attempt in 1..8 {
            let d = backoff_for_attempt(attempt);
            assert!(d.as_millis() <= 5_000);
        }
    }

    #[test]
    fn parse_sse_data_decodes_a_single_line_frame() {
        let chunk = parse_sse_data("data: {\"text\": \"hi\"}").unwrap().unwrap();
        assert_eq!(chunk, serde_json::json!({"text": "hi"}));
    }

    #[test]
    fn parse_sse_data_ignores_comment_only_frames() {
        assert!(parse_sse_data(": keep-alive").is_none());
    }
}
