//! Agent specification types for the mesh core.
//!
//! These types define the configuration passed from language SDKs to the Rust core.

#[cfg(feature = "python")]
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

/// A selector describes a desired capability for discovery or dependency declaration.
///
/// `tags` carries the bare/`+tag`/`-tag`/`(a|b|+c)` operator syntax verbatim; parsing of
/// the operator grammar happens in the resolver, not here — this type is the wire/spec
/// shape only.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    /// Capability name to depend on
    pub capability: String,

    /// Tags for filtering (e.g., ["+fast", "-deprecated", "(py|+ts)"])
    pub tags: Vec<String>,

    /// Version constraint (e.g., ">=2.0.0")
    pub version_constraint: Option<String>,

    /// Namespace to restrict the search to; defaults to the requester's own namespace.
    pub namespace: Option<String>,
}

#[cfg(feature = "python")]
#[pymethods]
impl Selector {
    #[new]
    #[pyo3(signature = (capability, tags=None, version_constraint=None, namespace=None))]
    pub fn py_new(
        capability: String,
        tags: Option<Vec<String>>,
        version_constraint: Option<String>,
        namespace: Option<String>,
    ) -> Self {
        Self::new(capability, tags, version_constraint, namespace)
    }

    fn __repr__(&self) -> String {
        format!("Selector(capability={:?}, tags={:?})", self.capability, self.tags)
    }
}

impl Selector {
    /// Create a new Selector (language-agnostic)
    pub fn new(
        capability: String,
        tags: Option<Vec<String>>,
        version_constraint: Option<String>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            capability,
            tags: tags.unwrap_or_default(),
            version_constraint,
            namespace,
        }
    }
}

/// Proxy-tuning knobs attached to a `ToolSpec`, controlling how the invoker calls the
/// tool's resolved dependencies once a proxy entry exists.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyOptions {
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub streaming: bool,
    pub custom_headers: std::collections::HashMap<String, String>,
    pub session_required: bool,
    pub stateful: bool,
    pub auto_session_management: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_count: 1,
            streaming: false,
            custom_headers: std::collections::HashMap::new(),
            session_required: false,
            stateful: false,
            auto_session_management: true,
        }
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl ProxyOptions {
    #[new]
    #[pyo3(signature = (
        timeout_ms=30_000,
        retry_count=1,
        streaming=false,
        custom_headers=None,
        session_required=false,
        stateful=false,
        auto_session_management=true
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn py_new(
        timeout_ms: u64,
        retry_count: u32,
        streaming: bool,
        custom_headers: Option<std::collections::HashMap<String, String>>,
        session_required: bool,
        stateful: bool,
        auto_session_management: bool,
    ) -> Self {
        Self {
            timeout_ms,
            retry_count,
            streaming,
            custom_headers: custom_headers.unwrap_or_default(),
            session_required,
            stateful,
            auto_session_management,
        }
    }
}

/// Specification for a tool/capability provided by the agent.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Function name in the code
    pub function_name: String,

    /// Capability name for discovery
    pub capability: String,

    /// Version of this capability
    pub version: String,

    /// Tags for filtering (operator syntax, see `Selector`)
    pub tags: Vec<String>,

    /// Human-readable description
    pub description: String,

    /// Dependencies required by this tool
    pub dependencies: Vec<Selector>,

    /// JSON Schema for input parameters (MCP format) - serialized JSON string
    pub input_schema: Option<String>,

    /// LLM filter specification (for @mesh.llm decorated functions) - serialized JSON string
    pub llm_filter: Option<String>,

    /// LLM provider specification (for @mesh.llm_provider) - serialized JSON string
    pub llm_provider: Option<String>,

    /// Proxy-tuning kwargs controlling the invoker's per-call behaviour
    #[serde(default)]
    pub proxy_options: ProxyOptions,
}

#[cfg(feature = "python")]
#[pymethods]
impl ToolSpec {
    #[new]
    #[pyo3(signature = (
        function_name,
        capability,
        version="1.0.0".to_string(),
        description="".to_string(),
        tags=None,
        dependencies=None,
        input_schema=None,
        llm_filter=None,
        llm_provider=None,
        proxy_options=None
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn py_new(
        function_name: String,
        capability: String,
        version: String,
        description: String,
        tags: Option<Vec<String>>,
        dependencies: Option<Vec<Selector>>,
        input_schema: Option<String>,
        llm_filter: Option<String>,
        llm_provider: Option<String>,
        proxy_options: Option<ProxyOptions>,
    ) -> Self {
        Self::new(
            function_name,
            capability,
            version,
            description,
            tags,
            dependencies,
            input_schema,
            llm_filter,
            llm_provider,
            proxy_options,
        )
    }

    fn __repr__(&self) -> String {
        format!(
            "ToolSpec(function_name={:?}, capability={:?})",
            self.function_name, self.capability
        )
    }
}

impl ToolSpec {
    /// Create a new ToolSpec (language-agnostic)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        function_name: String,
        capability: String,
        version: String,
        description: String,
        tags: Option<Vec<String>>,
        dependencies: Option<Vec<Selector>>,
        input_schema: Option<String>,
        llm_filter: Option<String>,
        llm_provider: Option<String>,
        proxy_options: Option<ProxyOptions>,
    ) -> Self {
        Self {
            function_name,
            capability,
            version,
            description,
            tags: tags.unwrap_or_default(),
            dependencies: dependencies.unwrap_or_default(),
            input_schema,
            llm_filter,
            llm_provider,
            proxy_options: proxy_options.unwrap_or_default(),
        }
    }
}

/// Specification for an LLM agent function.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAgentSpec {
    /// Unique identifier for this LLM function
    pub function_id: String,

    /// Provider selector (capability=llm + tags) - serialized JSON string
    pub provider: String,

    /// Tool filter specification (list of Selectors) - serialized JSON string
    pub filter: Option<String>,

    /// Filter mode: "all", "best_match", or "*"
    pub filter_mode: String,

    /// Maximum agentic loop iterations
    pub max_iterations: u32,

    /// System prompt template, inline text or a `file://`/`http(s)://` URI
    pub system_prompt_template: Option<String>,
}

#[cfg(feature = "python")]
#[pymethods]
impl LlmAgentSpec {
    #[new]
    #[pyo3(signature = (function_id, provider, filter=None, filter_mode="all".to_string(), max_iterations=1, system_prompt_template=None))]
    #[allow(clippy::too_many_arguments)]
    pub fn py_new(
        function_id: String,
        provider: String,
        filter: Option<String>,
        filter_mode: String,
        max_iterations: u32,
        system_prompt_template: Option<String>,
    ) -> Self {
        Self::new(function_id, provider, filter, filter_mode, max_iterations, system_prompt_template)
    }

    fn __repr__(&self) -> String {
        format!("LlmAgentSpec(function_id={:?})", self.function_id)
    }
}

impl LlmAgentSpec {
    /// Create a new LlmAgentSpec (language-agnostic)
    pub fn new(
        function_id: String,
        provider: String,
        filter: Option<String>,
        filter_mode: String,
        max_iterations: u32,
        system_prompt_template: Option<String>,
    ) -> Self {
        Self {
            function_id,
            provider,
            filter,
            filter_mode,
            max_iterations,
            system_prompt_template,
        }
    }
}

/// Complete specification for a mesh agent.
///
/// This is the primary configuration passed from language SDKs to start the agent runtime.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique agent name/identifier (unique per namespace)
    pub name: String,

    /// Agent version (semver)
    pub version: String,

    /// Human-readable description
    pub description: String,

    /// Registry URL (e.g., "http://localhost:8100")
    pub registry_url: String,

    /// HTTP port for this agent (0 = auto-assign, updated in place after bind)
    pub http_port: u16,

    /// HTTP host announced to registry (0.0.0.0 triggers external-IP auto-detect)
    pub http_host: String,

    /// Namespace for isolation
    pub namespace: String,

    /// Runtime tag, e.g. "py", "ts", "java", "go"
    pub runtime: String,

    /// Tools/capabilities provided by this agent
    pub tools: Vec<ToolSpec>,

    /// LLM agent specifications
    pub llm_agents: Vec<LlmAgentSpec>,

    /// Heartbeat interval in seconds
    pub heartbeat_interval: u64,
}

#[cfg(feature = "python")]
#[pymethods]
impl AgentSpec {
    #[new]
    #[pyo3(signature = (
        name,
        registry_url,
        version="1.0.0".to_string(),
        description="".to_string(),
        http_port=0,
        http_host="localhost".to_string(),
        namespace="default".to_string(),
        runtime="py".to_string(),
        tools=None,
        llm_agents=None,
        heartbeat_interval=5
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn py_new(
        name: String,
        registry_url: String,
        version: String,
        description: String,
        http_port: u16,
        http_host: String,
        namespace: String,
        runtime: String,
        tools: Option<Vec<ToolSpec>>,
        llm_agents: Option<Vec<LlmAgentSpec>>,
        heartbeat_interval: u64,
    ) -> Self {
        Self::new(
            name,
            registry_url,
            version,
            description,
            http_port,
            http_host,
            namespace,
            runtime,
            tools,
            llm_agents,
            heartbeat_interval,
        )
    }

    fn __repr__(&self) -> String {
        format!(
            "AgentSpec(name={:?}, runtime={:?}, tools={}, llm_agents={})",
            self.name,
            self.runtime,
            self.tools.len(),
            self.llm_agents.len()
        )
    }
}

impl AgentSpec {
    /// Create a new AgentSpec (language-agnostic)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        registry_url: String,
        version: String,
        description: String,
        http_port: u16,
        http_host: String,
        namespace: String,
        runtime: String,
        tools: Option<Vec<ToolSpec>>,
        llm_agents: Option<Vec<LlmAgentSpec>>,
        heartbeat_interval: u64,
    ) -> Self {
        Self {
            name,
            version,
            description,
            registry_url,
            http_port,
            http_host,
            namespace,
            runtime,
            tools: tools.unwrap_or_default(),
            llm_agents: llm_agents.unwrap_or_default(),
            heartbeat_interval,
        }
    }

    /// The key the registry uses for uniqueness: `(namespace, name)`.
    pub fn agent_key(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    /// Self-chosen identifier sent on registration and heartbeats.
    ///
    /// The registry is expected to echo this same value back rather than mint its own,
    /// so runtime code can reference an agent's id before any registry round-trip completes.
    pub fn agent_id(&self) -> String {
        self.agent_key().1
    }

    /// Get all dependency capabilities required by this agent's tools
    pub fn all_dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self
            .tools
            .iter()
            .flat_map(|t| t.dependencies.iter().map(|d| d.capability.clone()))
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

/// Resolved dependency information from registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Capability name
    pub capability: String,

    /// Agent ID providing this capability
    pub agent_id: String,

    /// Endpoint URL (e.g., "http://localhost:9001")
    pub endpoint: String,

    /// Function name to call
    pub function_name: String,

    /// Agent health status
    pub status: String,

    /// TTL in seconds
    pub ttl: u64,
}

/// Resolved LLM tools for an LLM agent function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLlmTools {
    /// Function ID of the LLM agent
    pub function_id: String,

    /// List of available tools
    pub tools: Vec<ResolvedTool>,
}

/// A resolved tool available to an LLM agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTool {
    /// Function name
    pub function_name: String,

    /// Capability name
    pub capability: String,

    /// Endpoint URL
    pub endpoint: String,

    /// Input schema for the tool
    pub input_schema: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_spec_creation() {
        let spec = AgentSpec::new(
            "test-agent".to_string(),
            "http://localhost:8100".to_string(),
            "1.0.0".to_string(),
            "Test agent".to_string(),
            9000,
            "localhost".to_string(),
            "default".to_string(),
            "py".to_string(),
            None,
            None,
            5,
        );

        assert_eq!(spec.name, "test-agent");
        assert_eq!(spec.agent_key(), ("default".to_string(), "test-agent".to_string()));
        assert!(spec.tools.is_empty());
    }

    #[test]
    fn test_proxy_options_defaults() {
        let opts = ProxyOptions::default();
        assert_eq!(opts.timeout_ms, 30_000);
        assert_eq!(opts.retry_count, 1);
        assert!(!opts.streaming);
        assert!(opts.auto_session_management);
    }

    #[test]
    fn test_all_dependencies() {
        let mut spec = AgentSpec::new(
            "test-agent".to_string(),
            "http://localhost:8100".to_string(),
            "1.0.0".to_string(),
            "".to_string(),
            0,
            "localhost".to_string(),
            "default".to_string(),
            "py".to_string(),
            None,
            None,
            5,
        );

        spec.tools = vec![
            ToolSpec::new(
                "func1".to_string(),
                "cap1".to_string(),
                "1.0.0".to_string(),
                "".to_string(),
                None,
                Some(vec![
                    Selector::new("date-service".to_string(), None, None, None),
                    Selector::new("weather-service".to_string(), None, None, None),
                ]),
                None,
                None,
                None,
                None,
            ),
            ToolSpec::new(
                "func2".to_string(),
                "cap2".to_string(),
                "1.0.0".to_string(),
                "".to_string(),
                None,
                Some(vec![Selector::new("date-service".to_string(), None, None, None)]),
                None,
                None,
                None,
                None,
            ),
        ];

        let deps = spec.all_dependencies();
        assert_eq!(deps, vec!["date-service", "weather-service"]);
    }
}
