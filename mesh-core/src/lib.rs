//! Agent-side runtime for the MCP agent coordination mesh.
//!
//! This crate is compiled once and exposed to three front ends:
//! - Python, via PyO3 (`python` feature, default on)
//! - TypeScript/Node.js, via napi-rs (`typescript` feature)
//! - Any other language, via a C-compatible FFI surface (`ffi` feature)
//!
//! All three front ends drive the same [`AgentRuntime`]: they build an
//! [`AgentSpec`], hand it to [`start_agent_internal`], and get back an
//! [`AgentHandle`] for event streaming, state queries and shutdown.

pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod heartbeat;
pub mod llm;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod spec;
pub mod trace;
pub mod tracing_publish;

#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "typescript")]
pub mod napi;

use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use std::sync::Arc;
use tracing::info;

use crate::handle::{AgentHandle, HandleState};
use crate::runtime::{AgentRuntime, RuntimeCommand, RuntimeConfig};
use crate::spec::AgentSpec;

/// Background tokio runtime shared by every agent started from Python or
/// TypeScript. Built lazily on first use and kept alive for the process
/// lifetime; individual agents are tasks spawned onto it, not runtimes of
/// their own (unlike the FFI surface, which owns one runtime per handle
/// so C callers can tear it down deterministically).
static SHARED_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

fn shared_runtime() -> &'static tokio::runtime::Runtime {
    SHARED_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mesh-agent")
            .build()
            .expect("failed to build mesh-core tokio runtime")
    })
}

/// Initialize structured logging, honoring `RUST_LOG`/`MCP_MESH_LOG_LEVEL`.
///
/// Safe to call more than once (including once per language runtime reload);
/// only the first call takes effect.
pub fn init_logging() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = std::env::var("MCP_MESH_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_target(true)
            .try_init();
    });
}

/// Start an agent runtime for the given spec and return a handle to it.
///
/// Shared by the Python and TypeScript front ends. The runtime is spawned
/// onto [`shared_runtime`]; construction itself happens synchronously so
/// callers see configuration errors (bad registry URL, invalid spec) before
/// getting a handle back, rather than as a silent first-heartbeat failure.
pub fn start_agent_internal(spec: AgentSpec) -> Result<AgentHandle, String> {
    let (event_tx, event_rx) = mpsc::channel(100);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let (command_tx, command_rx) = mpsc::channel::<RuntimeCommand>(10);
    let shared_state = Arc::new(RwLock::new(HandleState::default()));

    let config = RuntimeConfig {
        heartbeat: crate::heartbeat::HeartbeatConfig {
            interval: Duration::from_secs(spec.heartbeat_interval),
            ..Default::default()
        },
        ..Default::default()
    };

    let spec_name = spec.name.clone();
    crate::trace::set_agent_context(crate::trace::AgentContext {
        agent_id: spec.agent_id(),
        agent_name: spec.name.clone(),
        agent_namespace: spec.namespace.clone(),
        agent_endpoint: format!("http://{}:{}", spec.http_host, spec.http_port),
        runtime: spec.runtime.clone(),
    });
    let shared_state_clone = shared_state.clone();
    let agent_runtime = shared_runtime()
        .block_on(async { AgentRuntime::new(spec, config, event_tx, shared_state_clone, shutdown_rx, command_rx) })
        .map_err(crate::error::CoreError::from)
        .map_err(|e| format!("[{}] {e}", e.kind()))?;

    let proxy = agent_runtime.proxy();

    shared_runtime().spawn(async move {
        agent_runtime.run().await;
    });

    info!("Started agent '{}'", spec_name);

    Ok(AgentHandle::new(event_rx, shared_state, shutdown_tx, command_tx, proxy))
}

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;

    use crate::events::{EventType, HealthStatus, LlmToolInfo, MeshEvent};
    use crate::handle::AgentHandle;
    use crate::spec::{AgentSpec, LlmAgentSpec, ProxyOptions, Selector, ToolSpec};

    /// Start an agent runtime from a Python-built `AgentSpec`.
    #[pyfunction]
    fn start_agent(spec: AgentSpec) -> PyResult<AgentHandle> {
        crate::init_logging();
        crate::start_agent_internal(spec)
            .map_err(pyo3::exceptions::PyRuntimeError::new_err)
    }

    #[pymodule]
    pub fn mesh_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<AgentSpec>()?;
        m.add_class::<Selector>()?;
        m.add_class::<ToolSpec>()?;
        m.add_class::<LlmAgentSpec>()?;
        m.add_class::<ProxyOptions>()?;
        m.add_class::<MeshEvent>()?;
        m.add_class::<EventType>()?;
        m.add_class::<HealthStatus>()?;
        m.add_class::<LlmToolInfo>()?;
        m.add_class::<AgentHandle>()?;

        m.add_function(wrap_pyfunction!(start_agent, m)?)?;

        m.add_function(wrap_pyfunction!(crate::config::resolve_config_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::config::resolve_config_bool_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::config::resolve_config_int_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::config::is_tracing_enabled_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::config::get_redis_url_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::config::auto_detect_ip_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::config::get_default_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::config::get_env_var_py, m)?)?;

        m.add_function(wrap_pyfunction!(crate::tracing_publish::init_trace_publisher_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::tracing_publish::publish_span_py, m)?)?;
        m.add_function(wrap_pyfunction!(crate::tracing_publish::is_trace_publisher_available_py, m)?)?;

        Ok(())
    }
}
