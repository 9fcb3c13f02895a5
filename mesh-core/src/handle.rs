//! Agent handle for controlling the runtime and receiving events.
//!
//! The AgentHandle is returned when starting an agent and provides:
//! - Async event stream for topology updates
//! - Current state queries
//! - Shutdown control

#[cfg(feature = "python")]
use pyo3::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::events::{HealthStatus, MeshEvent};
use crate::proxy::ProxyInvoker;
use crate::runtime::RuntimeCommand;
use crate::spec::ToolSpec;

#[cfg(feature = "python")]
use crate::proxy::LocalHandler;

/// Bridges a self-dependency call into a Python coroutine, so a tool
/// decorated as its own dependency's provider never leaves the process
/// (the self-call shortcut from §4.3).
#[cfg(feature = "python")]
struct PyCallableLocalHandler {
    callback: pyo3::Py<pyo3::PyAny>,
}

#[cfg(feature = "python")]
#[async_trait::async_trait]
impl LocalHandler for PyCallableLocalHandler {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, String> {
        let arguments_json = arguments.to_string();

        let future = Python::with_gil(|py| -> PyResult<_> {
            let coro = self.callback.call1(py, (arguments_json,))?;
            pyo3_async_runtimes::tokio::into_future(coro.into_bound(py))
        })
        .map_err(|e| e.to_string())?;

        let result = future.await.map_err(|e| e.to_string())?;

        let result_json: String = Python::with_gil(|py| result.extract(py)).map_err(|e| e.to_string())?;

        serde_json::from_str(&result_json).map_err(|e| e.to_string())
    }
}

/// Internal state shared between handle and runtime.
pub struct HandleState {
    /// Current dependency endpoints (capability -> endpoint)
    pub dependencies: HashMap<String, String>,

    /// Current health status
    pub health_status: HealthStatus,

    /// Whether shutdown has been requested
    pub shutdown_requested: bool,

    /// Agent ID assigned by registry
    pub agent_id: Option<String>,
}

impl Default for HandleState {
    fn default() -> Self {
        Self {
            dependencies: HashMap::new(),
            health_status: HealthStatus::Healthy,
            shutdown_requested: false,
            agent_id: None,
        }
    }
}

/// Handle to a running agent runtime.
///
/// This is the primary interface for language SDKs to interact with the Rust core.
/// It provides async event streaming and state queries.
#[cfg_attr(feature = "python", pyclass)]
pub struct AgentHandle {
    /// Event receiver (from runtime)
    event_rx: Arc<Mutex<mpsc::Receiver<MeshEvent>>>,

    /// Shared state
    state: Arc<RwLock<HandleState>>,

    /// Shutdown signal sender
    shutdown_tx: mpsc::Sender<()>,

    /// Command sender into the running runtime (tool updates, port updates, ...)
    command_tx: mpsc::Sender<RuntimeCommand>,

    /// Proxy table backing resolved dependencies, shared with the runtime so SDKs
    /// can call through to a dependency without reimplementing HTTP/retry/SSE.
    proxy: Arc<ProxyInvoker>,
}

impl AgentHandle {
    /// Create a new handle with the given channels.
    pub fn new(
        event_rx: mpsc::Receiver<MeshEvent>,
        state: Arc<RwLock<HandleState>>,
        shutdown_tx: mpsc::Sender<()>,
        command_tx: mpsc::Sender<RuntimeCommand>,
        proxy: Arc<ProxyInvoker>,
    ) -> Self {
        Self {
            event_rx: Arc::new(Mutex::new(event_rx)),
            state,
            shutdown_tx,
            command_tx,
            proxy,
        }
    }

    /// Get a reference to the shared state.
    pub fn state(&self) -> Arc<RwLock<HandleState>> {
        self.state.clone()
    }

    /// Clone of the event receiver handle, shared with any FFI/napi wrapper that
    /// also needs to poll events directly.
    pub fn event_rx(&self) -> Arc<Mutex<mpsc::Receiver<MeshEvent>>> {
        self.event_rx.clone()
    }

    /// Push an updated tool list into the running runtime (e.g. a decorator that
    /// registers a new capability after the agent already started).
    pub async fn update_tools_async(&self, tools: Vec<ToolSpec>) {
        let _ = self.command_tx.send(RuntimeCommand::UpdateTools(tools)).await;
    }

    /// Push the real bound port into the running runtime once it's known (the spec
    /// may have requested auto-assign with port 0).
    pub async fn update_port_async(&self, port: u16) {
        let _ = self.command_tx.send(RuntimeCommand::UpdatePort(port)).await;
    }

    /// Call through to a resolved dependency by (capability, dependency index),
    /// the same slot key the runtime keeps in sync with heartbeat responses.
    ///
    /// Used by SDKs that want to invoke a dependency directly rather than
    /// re-deriving its endpoint from `get_dependencies()` and issuing their own
    /// HTTP request - this reuses the runtime's retry/backoff/tracing-header logic.
    pub async fn call_tool_async(
        &self,
        capability: String,
        dep_index: u32,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        self.proxy
            .call(&(capability, dep_index), arguments)
            .await
            .map_err(crate::error::CoreError::from)
            .map_err(|e| format!("[{}] {e}", e.kind()))
    }

    /// Request graceful shutdown and wait for the runtime to acknowledge it by
    /// observing the shutdown flag, without blocking on `next_event()`.
    pub async fn shutdown_async(&self) {
        {
            let mut state = self.state.write().await;
            state.shutdown_requested = true;
        }
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Python-specific methods for AgentHandle
#[cfg(feature = "python")]
#[pymethods]
impl AgentHandle {
    /// Wait for and return the next mesh event.
    ///
    /// This is an async method that blocks until an event is available.
    /// Returns None when the runtime has shut down.
    ///
    /// # Example (Python)
    /// ```python
    /// event = await handle.next_event()
    /// if event.event_type == "dependency_available":
    ///     print(f"Dependency {event.capability} at {event.endpoint}")
    /// ```
    fn next_event<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        let event_rx = self.event_rx.clone();

        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            let mut rx = event_rx.lock().await;
            match rx.recv().await {
                Some(event) => Ok(event),
                None => {
                    // Channel closed, return shutdown event
                    Ok(MeshEvent::shutdown())
                }
            }
        })
    }

    /// Get current dependency endpoints.
    ///
    /// Returns a dict mapping capability names to endpoint URLs.
    /// This is a snapshot of the current state.
    fn get_dependencies(&self) -> PyResult<HashMap<String, String>> {
        Ok(self.get_dependencies_internal())
    }

    /// Get current agent health status.
    fn get_status(&self) -> PyResult<HealthStatus> {
        Ok(self.get_status_internal())
    }

    /// Get the agent ID assigned by the registry.
    ///
    /// Returns None if not yet registered.
    fn get_agent_id(&self) -> PyResult<Option<String>> {
        Ok(self.get_agent_id_internal())
    }

    /// Check if shutdown has been requested.
    fn is_shutdown_requested(&self) -> PyResult<bool> {
        Ok(self.is_shutdown_requested_internal())
    }

    /// Call a resolved dependency directly through the runtime's proxy table.
    ///
    /// `arguments_json` is a JSON-encoded object of call arguments; the result
    /// is returned as a JSON-encoded string. Raises `RuntimeError` if the slot
    /// has no resolved target or the remote call ultimately fails.
    ///
    /// # Example (Python)
    /// ```python
    /// result = await handle.call_tool("weather", 0, '{"city": "nyc"}')
    /// ```
    fn call_tool<'py>(
        &self,
        py: Python<'py>,
        capability: String,
        dep_index: u32,
        arguments_json: String,
    ) -> PyResult<Bound<'py, PyAny>> {
        let proxy = self.proxy.clone();
        pyo3_async_runtimes::tokio::future_into_py(py, async move {
            let arguments: serde_json::Value = serde_json::from_str(&arguments_json)
                .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
            let result = proxy
                .call(&(capability, dep_index), arguments)
                .await
                .map_err(crate::error::CoreError::from)
                .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(format!("[{}] {e}", e.kind())))?;
            serde_json::to_string(&result)
                .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
        })
    }

    /// Register a local implementation for one of this agent's own tools, so a
    /// dependency call that resolves to this same agent is served in-process
    /// instead of round-tripping over HTTP (the self-call shortcut, §4.3).
    ///
    /// `callback` must be an async callable accepting a JSON-encoded arguments
    /// string and returning a JSON-encoded result string.
    ///
    /// # Example (Python)
    /// ```python
    /// handle.register_local_tool("addition", 0, add_tool_entrypoint)
    /// ```
    fn register_local_tool(
        &self,
        capability: String,
        dep_index: u32,
        callback: Py<PyAny>,
    ) -> PyResult<()> {
        let handler: std::sync::Arc<dyn crate::proxy::LocalHandler> =
            std::sync::Arc::new(PyCallableLocalHandler { callback });
        self.proxy.register_local((capability, dep_index), handler, crate::spec::ProxyOptions::default());
        Ok(())
    }

    /// Request graceful shutdown of the agent runtime.
    ///
    /// This signals the runtime to stop heartbeats and clean up.
    /// The next call to `next_event()` will return a shutdown event.
    fn shutdown(&self) -> PyResult<()> {
        self.shutdown_internal();
        Ok(())
    }

    fn __repr__(&self) -> String {
        let state = self.state.blocking_read();
        format!(
            "AgentHandle(agent_id={:?}, dependencies={}, status={:?})",
            state.agent_id,
            state.dependencies.len(),
            state.health_status
        )
    }
}

/// Language-agnostic methods for AgentHandle (used by both Python and FFI)
impl AgentHandle {
    /// Get current dependency endpoints.
    pub fn get_dependencies_internal(&self) -> HashMap<String, String> {
        let state = self.state.blocking_read();
        state.dependencies.clone()
    }

    /// Get current agent health status.
    pub fn get_status_internal(&self) -> HealthStatus {
        let state = self.state.blocking_read();
        state.health_status
    }

    /// Get the agent ID assigned by the registry.
    pub fn get_agent_id_internal(&self) -> Option<String> {
        let state = self.state.blocking_read();
        state.agent_id.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown_requested_internal(&self) -> bool {
        let state = self.state.blocking_read();
        state.shutdown_requested
    }

    /// Request graceful shutdown of the agent runtime.
    pub fn shutdown_internal(&self) {
        // Set shutdown flag
        {
            let mut state = self.state.blocking_write();
            state.shutdown_requested = true;
        }

        // Send shutdown signal (non-blocking, ignore if full)
        let _ = self.shutdown_tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_state() {
        let (event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        let (command_tx, _command_rx) = mpsc::channel(10);
        let state = Arc::new(RwLock::new(HandleState::default()));

        let proxy = Arc::new(ProxyInvoker::new("test-agent"));
        let _handle = AgentHandle::new(event_rx, state.clone(), shutdown_tx, command_tx, proxy);

        // Update state
        {
            let mut s = state.write().await;
            s.agent_id = Some("test-agent".to_string());
            s.dependencies.insert("date-service".to_string(), "http://localhost:9001".to_string());
        }

        // Query state directly (avoid blocking_read in async context)
        {
            let s = state.read().await;
            assert_eq!(s.agent_id, Some("test-agent".to_string()));
            assert_eq!(s.dependencies.len(), 1);
        }

        // Send an event
        event_tx
            .send(MeshEvent::dependency_available(
                "weather".to_string(),
                "http://localhost:9002".to_string(),
                "get_weather".to_string(),
                "weather-agent".to_string(),
                Some("forecast".to_string()),
                Some(0),
            ))
            .await
            .unwrap();

        drop(event_tx);
    }

    #[test]
    fn test_handle_shutdown() {
        let (_event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let (command_tx, _command_rx) = mpsc::channel(10);
        let state = Arc::new(RwLock::new(HandleState::default()));

        let proxy = Arc::new(ProxyInvoker::new("test-agent"));
        let handle = AgentHandle::new(event_rx, state.clone(), shutdown_tx, command_tx, proxy);

        // Request shutdown (using internal method for tests)
        handle.shutdown_internal();

        // Check flag is set
        assert!(handle.is_shutdown_requested_internal());

        // Check signal was sent
        assert!(shutdown_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_call_tool_async_unbound_slot_is_an_error() {
        let (_event_tx, event_rx) = mpsc::channel(10);
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        let (command_tx, _command_rx) = mpsc::channel(10);
        let state = Arc::new(RwLock::new(HandleState::default()));
        let proxy = Arc::new(ProxyInvoker::new("test-agent"));
        let handle = AgentHandle::new(event_rx, state, shutdown_tx, command_tx, proxy);

        let err = handle
            .call_tool_async("weather".to_string(), 0, serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.contains("weather"));
    }
}
