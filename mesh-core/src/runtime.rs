//! Agent runtime - the main background task that manages heartbeats and topology.
//!
//! The runtime:
//! - Runs in a background tokio task
//! - Manages the heartbeat state machine
//! - Sends events to the language SDK via channels
//! - Tracks topology changes and emits dependency events
//! - Accepts `RuntimeCommand`s from the SDK side (e.g. tool updates after dynamic
//!   registration, or the real port once an auto-assigned HTTP server has bound one)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{info, trace, warn};

use crate::events::{LlmProviderInfo, LlmToolInfo, MeshEvent};
use crate::handle::HandleState;
use crate::heartbeat::{self, HeartbeatAction, HeartbeatConfig, HeartbeatStateMachine};
use crate::proxy::{ProxyInvoker, ProxyTarget};
use crate::registry::{HeartbeatRequest, HeartbeatResponse, RegistryClient};
use crate::spec::{AgentSpec, ToolSpec};

/// Internal provider tracking (non-PyO3 to avoid GIL issues in tokio thread)
#[derive(Debug, Clone)]
struct TrackedProvider {
    function_id: String,
    agent_id: String,
    endpoint: String,
    function_name: String,
    model: Option<String>,
}

/// Commands sent from the language SDK / handle side into the running agent runtime.
///
/// These arrive out of band from the heartbeat loop itself - e.g. a decorator
/// registering a new tool after the agent already started, or the HTTP server
/// reporting back the port it actually bound when the spec requested auto-assign (0).
#[derive(Debug, Clone)]
pub enum RuntimeCommand {
    /// Replace the agent's tool specs. Marks the local spec dirty so the next
    /// successful fast heartbeat escalates to a full heartbeat.
    UpdateTools(Vec<ToolSpec>),
    /// Update the HTTP port announced to the registry.
    UpdatePort(u16),
}

/// Configuration for the agent runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Heartbeat configuration
    pub heartbeat: HeartbeatConfig,
    /// Event channel buffer size
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            event_buffer_size: 100,
        }
    }
}

/// Topology state - tracks current dependency endpoints.
#[derive(Debug, Default)]
struct TopologyState {
    /// Current dependencies (capability -> (endpoint, function_name, agent_id))
    dependencies: HashMap<String, (String, String, String)>,
    /// LLM tools (function_id -> tools)
    llm_tools: HashMap<String, Vec<LlmToolInfo>>,
    /// LLM providers (function_id -> provider info) - using internal struct to avoid GIL issues
    llm_providers: HashMap<String, TrackedProvider>,
}

/// The agent runtime that runs in the background.
pub struct AgentRuntime {
    spec: AgentSpec,
    config: RuntimeConfig,
    registry_client: RegistryClient,
    state_machine: HeartbeatStateMachine,
    topology: TopologyState,
    /// Lock-free proxy table SDKs call through to reach resolved dependencies.
    proxy: Arc<ProxyInvoker>,
    /// Highest `resource_version` accepted from a heartbeat response so far.
    /// A response carrying a lower, non-zero version is a stale/reordered
    /// snapshot and is dropped without touching topology state.
    last_resource_version: u64,
    event_tx: mpsc::Sender<MeshEvent>,
    shared_state: Arc<RwLock<HandleState>>,
    shutdown_rx: mpsc::Receiver<()>,
    command_rx: mpsc::Receiver<RuntimeCommand>,
}

impl AgentRuntime {
    /// Create a new agent runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: AgentSpec,
        config: RuntimeConfig,
        event_tx: mpsc::Sender<MeshEvent>,
        shared_state: Arc<RwLock<HandleState>>,
        shutdown_rx: mpsc::Receiver<()>,
        command_rx: mpsc::Receiver<RuntimeCommand>,
    ) -> Result<Self, crate::registry::RegistryError> {
        let registry_client = RegistryClient::new(&spec.registry_url)?;
        let heartbeat_config = HeartbeatConfig {
            interval: Duration::from_secs(spec.heartbeat_interval),
            ..config.heartbeat.clone()
        };
        let state_machine = HeartbeatStateMachine::new(heartbeat_config);
        let proxy = Arc::new(ProxyInvoker::new(spec.agent_id()));

        Ok(Self {
            spec,
            config,
            registry_client,
            state_machine,
            topology: TopologyState::default(),
            proxy,
            last_resource_version: 0,
            event_tx,
            shared_state,
            shutdown_rx,
            command_rx,
        })
    }

    /// Shared handle to the proxy invoker backing this agent's resolved dependencies.
    ///
    /// Exposed so the language-SDK front ends (FFI/napi/PyO3) can route tool calls
    /// through the same lock-free table the runtime populates from heartbeat responses.
    pub fn proxy(&self) -> Arc<ProxyInvoker> {
        self.proxy.clone()
    }

    /// Proxy-tuning options declared by the tool whose code makes this dependency call.
    fn proxy_options_for(&self, requesting_function: Option<&str>) -> crate::spec::ProxyOptions {
        requesting_function
            .and_then(|f| self.spec.tools.iter().find(|t| t.function_name == f))
            .map(|t| t.proxy_options.clone())
            .unwrap_or_default()
    }

    /// Run the agent runtime loop.
    ///
    /// This is the main entry point that runs until shutdown is requested.
    pub async fn run(mut self) {
        info!("Starting agent runtime for '{}'", self.spec.name);

        loop {
            // Drain any pending commands before deciding the next heartbeat action.
            while let Ok(command) = self.command_rx.try_recv() {
                self.handle_command(command).await;
            }

            // Check for shutdown signal (non-blocking)
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Shutdown signal received");
                self.state_machine.shutdown();
            }

            if self.state_machine.is_shutting_down() {
                // Gracefully unregister from registry before stopping
                self.unregister_from_registry().await;
                break;
            }

            // Determine next action
            let action = self.state_machine.next_action();
            trace!("Next action: {:?}", action);

            match action {
                HeartbeatAction::SendFull => {
                    self.send_full_heartbeat().await;
                }
                HeartbeatAction::SendFast => {
                    self.send_fast_heartbeat().await;
                }
                HeartbeatAction::Wait(duration) => {
                    trace!("Waiting {:?} until next heartbeat", duration);
                    tokio::select! {
                        _ = sleep(duration) => {}
                        Some(command) = self.command_rx.recv() => {
                            self.handle_command(command).await;
                        }
                        _ = self.shutdown_rx.recv() => {
                            info!("Shutdown signal received during wait");
                            self.state_machine.shutdown();
                        }
                    }
                }
                HeartbeatAction::Retry { attempt, backoff } => {
                    let jittered = heartbeat::apply_jitter(backoff);
                    warn!(
                        "Retry attempt {} with backoff {:?} (jittered {:?})",
                        attempt, backoff, jittered
                    );
                    tokio::select! {
                        _ = sleep(jittered) => {}
                        Some(command) = self.command_rx.recv() => {
                            self.handle_command(command).await;
                        }
                        _ = self.shutdown_rx.recv() => {
                            info!("Shutdown signal received during backoff");
                            self.state_machine.shutdown();
                        }
                    }
                    // After backoff, try full registration
                    self.send_full_heartbeat().await;
                }
                HeartbeatAction::None => {
                    break;
                }
            }
        }

        // Send shutdown event
        let _ = self.event_tx.send(MeshEvent::shutdown()).await;
        info!("Agent runtime for '{}' stopped", self.spec.name);
    }

    /// Apply a command from the SDK side, marking the spec dirty so the change
    /// propagates on the next full heartbeat.
    async fn handle_command(&mut self, command: RuntimeCommand) {
        match command {
            RuntimeCommand::UpdateTools(tools) => {
                info!("Runtime command: replacing tool specs ({} tools)", tools.len());
                self.spec.tools = tools;
                self.state_machine.mark_spec_dirty();
            }
            RuntimeCommand::UpdatePort(port) => {
                info!("Runtime command: updating announced HTTP port to {}", port);
                self.spec.http_port = port;
                self.state_machine.mark_spec_dirty();
            }
        }
    }

    /// Unregister the agent from the registry during shutdown.
    ///
    /// This ensures immediate topology update for dependent agents
    /// instead of waiting for the heartbeat timeout.
    async fn unregister_from_registry(&self) {
        let agent_id = self.spec.agent_id();
        info!("Unregistering agent '{}' from registry", agent_id);

        match self.registry_client.unregister_agent(&agent_id).await {
            Ok(()) => {
                info!("Agent '{}' unregistered successfully", agent_id);
            }
            Err(e) => {
                // Log but don't fail shutdown - network issues shouldn't block shutdown
                warn!(
                    "Failed to unregister agent '{}' (continuing shutdown): {}",
                    agent_id, e
                );
            }
        }
    }

    /// Send a fast heartbeat check (HEAD request).
    async fn send_fast_heartbeat(&mut self) {
        let agent_id = self.spec.agent_id();
        let status = self.registry_client.fast_heartbeat_check(&agent_id).await;

        let action = self.state_machine.on_fast_heartbeat_result(status);

        // If we need a full heartbeat, do it now
        if action == HeartbeatAction::SendFull {
            self.send_full_heartbeat().await;
        }
    }

    /// Send a full heartbeat: `POST /agents` on first registration, otherwise
    /// `POST /agents/{id}/heartbeat` (the canonical conditional re-register).
    async fn send_full_heartbeat(&mut self) {
        let health_status = self.state_machine.health_status();

        let result = if self.state_machine.is_registered() {
            let request = HeartbeatRequest::from_spec(&self.spec, health_status);
            self.registry_client.send_heartbeat(&request).await
        } else {
            self.registry_client.register(&self.spec, health_status).await
        };

        match result {
            Ok(response) => {
                self.state_machine.on_full_heartbeat_success();

                // Update shared state with agent ID
                {
                    let mut state = self.shared_state.write().await;
                    state.agent_id = Some(response.agent_id.clone());
                }

                // Process topology changes
                self.process_heartbeat_response(response).await;

                // Send registration event if this was first successful registration
                if self.state_machine.heartbeat_count() == 1 {
                    let _ = self
                        .event_tx
                        .send(MeshEvent::agent_registered(self.spec.agent_id()))
                        .await;
                }
            }
            Err(e) => {
                self.state_machine.on_full_heartbeat_failure(&e.to_string());

                // Send error event
                let _ = self
                    .event_tx
                    .send(MeshEvent::registration_failed(e.to_string()))
                    .await;
            }
        }
    }

    /// Process a heartbeat response and emit topology change events.
    ///
    /// `resource_version` is monotonically non-decreasing per invariant 3 of
    /// the data model; a response whose version is lower than the last one we
    /// applied is a stale/reordered snapshot (e.g. raced by a retry) and is
    /// ignored entirely rather than regressing topology state.
    async fn process_heartbeat_response(&mut self, response: HeartbeatResponse) {
        if response.resource_version != 0 && response.resource_version < self.last_resource_version {
            warn!(
                "Ignoring stale heartbeat response: resource_version {} < last accepted {}",
                response.resource_version, self.last_resource_version
            );
            return;
        }
        self.last_resource_version = response.resource_version;

        // Process dependency changes
        self.process_dependency_changes(&response.dependencies_resolved)
            .await;

        // Process LLM tools changes
        self.process_llm_tools_changes(&response.llm_tools).await;

        // Process LLM provider changes
        self.process_llm_providers_changes(&response.llm_providers)
            .await;
    }

    /// Find which tool/dependency-slot a capability corresponds to, for event metadata.
    fn dep_index_for(&self, requesting_function: &str, capability: &str) -> Option<u32> {
        self.spec
            .tools
            .iter()
            .find(|t| t.function_name == requesting_function)
            .and_then(|t| t.dependencies.iter().position(|d| d.capability == capability))
            .map(|i| i as u32)
    }

    /// Best-effort (function_name, dep_index) lookup for a capability that no longer
    /// resolves, used when emitting `dependency_unavailable`.
    fn requesting_info_for_capability(&self, capability: &str) -> (Option<String>, Option<u32>) {
        for tool in &self.spec.tools {
            if let Some(idx) = tool.dependencies.iter().position(|d| d.capability == capability) {
                return (Some(tool.function_name.clone()), Some(idx as u32));
            }
        }
        (None, None)
    }

    /// Process dependency resolution changes and emit events.
    ///
    /// This method batches state updates to minimize lock contention.
    async fn process_dependency_changes(
        &mut self,
        resolved: &HashMap<String, Vec<crate::registry::ResolvedDependency>>,
    ) {
        // capability -> (endpoint, func_name, agent_id, requesting_function, dep_index)
        let mut new_deps: HashMap<String, (String, String, String, Option<String>, Option<u32>)> =
            HashMap::new();

        // The registry returns dependencies keyed by the function that NEEDS them,
        // but each provider has the actual capability name we need to emit.
        // A function can depend on MULTIPLE capabilities (e.g., math_greeting needs add AND multiply).
        for (requesting_func, providers) in resolved {
            // Process ALL available/healthy providers, not just the first one
            for provider in providers.iter().filter(|p| p.status == "available" || p.status == "healthy") {
                let dep_index = self.dep_index_for(requesting_func, &provider.capability);
                // Use the actual capability from the provider, not the key
                new_deps.insert(
                    provider.capability.clone(),
                    (
                        provider.endpoint.clone(),
                        provider.function_name.clone(),
                        provider.agent_id.clone(),
                        Some(requesting_func.clone()),
                        dep_index,
                    ),
                );
            }
        }

        // Collect all changes first (before acquiring any locks)
        let mut removed_caps: Vec<String> = Vec::new();
        #[allow(clippy::type_complexity)]
        let mut added_or_changed: Vec<(String, String, String, String, Option<String>, Option<u32>, bool)> =
            Vec::new();

        // Find removed dependencies
        let old_caps: Vec<String> = self.topology.dependencies.keys().cloned().collect();
        for cap in old_caps {
            if !new_deps.contains_key(&cap) {
                info!("Dependency '{}' removed", cap);
                removed_caps.push(cap);
            }
        }

        // Find new or changed dependencies
        for (cap, (endpoint, func_name, agent_id, requesting_function, dep_index)) in &new_deps {
            let changed = match self.topology.dependencies.get(cap) {
                Some((old_ep, old_fn, _)) => old_ep != endpoint || old_fn != func_name,
                None => true,
            };

            if changed {
                let is_new = !self.topology.dependencies.contains_key(cap);
                if is_new {
                    info!(
                        "Dependency '{}' available at {} ({})",
                        cap, endpoint, func_name
                    );
                } else {
                    info!(
                        "Dependency '{}' changed to {} ({})",
                        cap, endpoint, func_name
                    );
                }
                added_or_changed.push((
                    cap.clone(),
                    endpoint.clone(),
                    func_name.clone(),
                    agent_id.clone(),
                    requesting_function.clone(),
                    *dep_index,
                    is_new,
                ));
            }
        }

        // Batch update shared state (single lock acquisition)
        if !removed_caps.is_empty() || !added_or_changed.is_empty() {
            let mut state = self.shared_state.write().await;
            for cap in &removed_caps {
                state.dependencies.remove(cap);
            }
            for (cap, endpoint, _, _, _, _, _) in &added_or_changed {
                state.dependencies.insert(cap.clone(), endpoint.clone());
            }
        }

        // Update local topology and emit events (no lock needed)
        for cap in removed_caps {
            let (requesting_function, dep_index) = self.requesting_info_for_capability(&cap);
            if let Some(idx) = dep_index {
                self.proxy.remove(&(cap.clone(), idx));
            }
            let _ = self
                .event_tx
                .send(MeshEvent::dependency_unavailable(cap.clone(), requesting_function, dep_index))
                .await;
            self.topology.dependencies.remove(&cap);
        }

        for (cap, endpoint, func_name, agent_id, requesting_function, dep_index, is_new) in added_or_changed {
            // Self-dependencies are served by a `LocalHandler` registered directly
            // against the SDK (bypassing HTTP entirely); don't clobber that slot
            // with a remote target just because the registry also resolved it.
            if let Some(idx) = dep_index {
                if !self.proxy.is_self(&agent_id) {
                    let options = self.proxy_options_for(requesting_function.as_deref());
                    self.proxy.upsert(
                        (cap.clone(), idx),
                        ProxyTarget::Remote {
                            endpoint: endpoint.clone(),
                            function_name: func_name.clone(),
                        },
                        options,
                    );
                }
            }

            let event = if is_new {
                MeshEvent::dependency_available(
                    cap.clone(),
                    endpoint.clone(),
                    func_name.clone(),
                    agent_id.clone(),
                    requesting_function,
                    dep_index,
                )
            } else {
                MeshEvent::dependency_changed(
                    cap.clone(),
                    endpoint.clone(),
                    func_name.clone(),
                    agent_id.clone(),
                    requesting_function,
                    dep_index,
                )
            };
            let _ = self.event_tx.send(event).await;

            self.topology
                .dependencies
                .insert(cap, (endpoint, func_name, agent_id));
        }
    }

    /// Check if two LlmToolInfo lists are equivalent.
    fn tools_are_equal(old: &[LlmToolInfo], new: &[LlmToolInfo]) -> bool {
        if old.len() != new.len() {
            return false;
        }

        // Check each tool - order matters for simplicity, but we compare all fields
        for (old_tool, new_tool) in old.iter().zip(new.iter()) {
            if old_tool.function_name != new_tool.function_name
                || old_tool.capability != new_tool.capability
                || old_tool.endpoint != new_tool.endpoint
                || old_tool.agent_id != new_tool.agent_id
                || old_tool.input_schema != new_tool.input_schema
            {
                return false;
            }
        }
        true
    }

    /// Process LLM tools changes and emit events.
    async fn process_llm_tools_changes(
        &mut self,
        llm_tools: &HashMap<String, Vec<crate::registry::LlmToolInfo>>,
    ) {
        for (function_id, tools) in llm_tools {
            // Convert to our event type
            let tool_infos: Vec<LlmToolInfo> = tools
                .iter()
                .map(|t| LlmToolInfo {
                    function_name: t.function_name.clone(),
                    capability: t.capability.clone(),
                    endpoint: t.endpoint.clone(),
                    agent_id: t.agent_id.clone(),
                    input_schema: t
                        .input_schema
                        .as_ref()
                        .and_then(|s| serde_json::to_string(s).ok()),
                })
                .collect();

            // Check if changed - compare all fields, not just length
            let changed = match self.topology.llm_tools.get(function_id) {
                Some(old_tools) => !Self::tools_are_equal(old_tools, &tool_infos),
                None => true,
            };

            if changed {
                info!(
                    "LLM tools updated for function '{}': {} tools",
                    function_id,
                    tool_infos.len()
                );

                // Emit event
                let _ = self
                    .event_tx
                    .send(MeshEvent::llm_tools_updated(
                        function_id.clone(),
                        tool_infos.clone(),
                    ))
                    .await;

                self.topology
                    .llm_tools
                    .insert(function_id.clone(), tool_infos);
            }
        }
    }

    /// Process LLM provider changes and emit events.
    async fn process_llm_providers_changes(
        &mut self,
        llm_providers: &HashMap<String, crate::registry::ResolvedLlmProvider>,
    ) {
        for (function_id, provider) in llm_providers {
            // Use internal tracking struct to avoid GIL issues
            let tracked = TrackedProvider {
                function_id: function_id.clone(),
                agent_id: provider.agent_id.clone(),
                endpoint: provider.endpoint.clone(),
                function_name: provider.function_name.clone(),
                model: provider.model.clone(),
            };

            // Check if changed
            let changed = match self.topology.llm_providers.get(function_id) {
                Some(old_provider) => {
                    old_provider.endpoint != tracked.endpoint
                        || old_provider.function_name != tracked.function_name
                }
                None => true,
            };

            if changed {
                info!(
                    "LLM provider resolved for function '{}': {} at {}",
                    function_id, tracked.function_name, tracked.endpoint
                );

                // Store the tracking info first (no PyO3 involvement)
                self.topology
                    .llm_providers
                    .insert(function_id.clone(), tracked.clone());

                // Create LlmProviderInfo and send event
                let provider_info = LlmProviderInfo {
                    function_id: function_id.clone(),
                    agent_id: provider.agent_id.clone(),
                    endpoint: provider.endpoint.clone(),
                    function_name: provider.function_name.clone(),
                    model: provider.model.clone(),
                };
                let _ = self
                    .event_tx
                    .send(MeshEvent::llm_provider_available(provider_info))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_config_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.event_buffer_size, 100);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
    }

    fn test_spec() -> AgentSpec {
        AgentSpec::new(
            "test-agent".to_string(),
            "http://localhost:8100".to_string(),
            "1.0.0".to_string(),
            "".to_string(),
            9000,
            "localhost".to_string(),
            "default".to_string(),
            "py".to_string(),
            None,
            None,
            5,
        )
    }

    async fn test_runtime() -> AgentRuntime {
        let (event_tx, _event_rx) = mpsc::channel(10);
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (_command_tx, command_rx) = mpsc::channel(10);
        let shared_state = Arc::new(RwLock::new(HandleState::default()));

        AgentRuntime::new(
            test_spec(),
            RuntimeConfig::default(),
            event_tx,
            shared_state,
            shutdown_rx,
            command_rx,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_handle_update_tools_marks_spec_dirty() {
        let mut runtime = test_runtime().await;
        let tools = vec![crate::spec::ToolSpec::new(
            "greet".to_string(),
            "greeting".to_string(),
            "1.0.0".to_string(),
            "".to_string(),
            None,
            None,
            None,
            None,
            None,
            None,
        )];

        runtime.handle_command(RuntimeCommand::UpdateTools(tools)).await;

        assert_eq!(runtime.spec.tools.len(), 1);
        assert!(runtime.state_machine.next_action() != HeartbeatAction::None);
    }

    #[tokio::test]
    async fn test_handle_update_port() {
        let mut runtime = test_runtime().await;
        runtime.handle_command(RuntimeCommand::UpdatePort(9100)).await;
        assert_eq!(runtime.spec.http_port, 9100);
    }

    #[tokio::test]
    async fn test_stale_resource_version_is_ignored() {
        let mut runtime = test_runtime().await;

        let first = HeartbeatResponse {
            status: "ok".to_string(),
            message: "ok".to_string(),
            agent_id: "test-agent".to_string(),
            resource_version: 5,
            dependencies_resolved: HashMap::from([(
                "greet".to_string(),
                vec![crate::registry::ResolvedDependency {
                    agent_id: "other-agent".to_string(),
                    endpoint: "http://localhost:9100".to_string(),
                    function_name: "add".to_string(),
                    capability: "addition".to_string(),
                    status: "healthy".to_string(),
                    ttl: 0,
                }],
            )]),
            llm_tools: HashMap::new(),
            llm_providers: HashMap::new(),
        };
        runtime.process_heartbeat_response(first).await;
        assert_eq!(runtime.last_resource_version, 5);
        assert!(runtime.topology.dependencies.contains_key("addition"));

        let stale = HeartbeatResponse {
            status: "ok".to_string(),
            message: "ok".to_string(),
            agent_id: "test-agent".to_string(),
            resource_version: 3,
            dependencies_resolved: HashMap::new(),
            llm_tools: HashMap::new(),
            llm_providers: HashMap::new(),
        };
        runtime.process_heartbeat_response(stale).await;

        // The stale snapshot (an empty dependency set at a lower resource_version)
        // must not be applied: the previously-accepted dependency stays in place
        // and the tracked resource_version does not regress.
        assert_eq!(runtime.last_resource_version, 5);
        assert!(runtime.topology.dependencies.contains_key("addition"));
    }

    #[test]
    fn test_dep_index_for() {
        let mut spec = test_spec();
        spec.tools = vec![crate::spec::ToolSpec::new(
            "greet".to_string(),
            "greeting".to_string(),
            "1.0.0".to_string(),
            "".to_string(),
            None,
            Some(vec![crate::spec::Selector::new(
                "date-service".to_string(),
                None,
                None,
                None,
            )]),
            None,
            None,
            None,
            None,
        )];

        let (event_tx, _event_rx) = mpsc::channel(10);
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (_command_tx, command_rx) = mpsc::channel(10);
        let shared_state = Arc::new(RwLock::new(HandleState::default()));
        let runtime = AgentRuntime::new(
            spec,
            RuntimeConfig::default(),
            event_tx,
            shared_state,
            shutdown_rx,
            command_rx,
        )
        .unwrap();

        assert_eq!(runtime.dep_index_for("greet", "date-service"), Some(0));
        assert_eq!(runtime.dep_index_for("greet", "unknown"), None);
    }
}
