//! Top-level error taxonomy for the agent-side runtime.
//!
//! Every module-local error type (`RegistryError`, `ProxyError`, `LlmError`) bridges into
//! `CoreError` via `#[from]`, giving SDK bindings one type to translate into a native
//! exception regardless of which subsystem failed.

use thiserror::Error;

use crate::llm::LlmError;
use crate::proxy::ProxyError;
use crate::registry::RegistryError;

/// Unified error type surfaced to language bindings.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Spec-time validation failure. Fatal, surfaced synchronously.
    #[error("invalid agent spec: {0}")]
    InvalidSpec(String),

    /// Registry could not be reached. Transient; the heartbeat engine retries
    /// indefinitely rather than surfacing this up front.
    #[error("registry unreachable: {0}")]
    RegistryUnreachable(#[from] RegistryError),

    /// Duplicate `(namespace, name)` registration with a different `agent_id`.
    #[error("conflicting registration for {namespace}/{name}")]
    ConflictingRegistration { namespace: String, name: String },

    /// A declared dependency has no bound proxy entry, or the call against one failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// The LLM agentic loop failed to complete.
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl CoreError {
    /// Stable machine-readable kind, independent of the `Display` message.
    /// SDKs map this to their own exception hierarchy.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidSpec(_) => "invalid_spec",
            CoreError::RegistryUnreachable(_) => "registry_unreachable",
            CoreError::ConflictingRegistration { .. } => "conflicting_registration",
            CoreError::Proxy(ProxyError::ToolUnavailable { .. }) => "tool_unavailable",
            CoreError::Proxy(ProxyError::ToolCallFailed { .. }) => "tool_call_failed",
            CoreError::Llm(_) => "llm_loop_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_for_proxy_variants() {
        let unavailable = CoreError::Proxy(ProxyError::ToolUnavailable {
            capability: "date".to_string(),
        });
        assert_eq!(unavailable.kind(), "tool_unavailable");

        let failed = CoreError::Proxy(ProxyError::ToolCallFailed {
            capability: "date".to_string(),
            function_name: "get_date".to_string(),
            cause: "timeout".to_string(),
        });
        assert_eq!(failed.kind(), "tool_call_failed");
    }

    #[test]
    fn invalid_spec_kind() {
        let err = CoreError::InvalidSpec("missing name".to_string());
        assert_eq!(err.kind(), "invalid_spec");
    }
}
