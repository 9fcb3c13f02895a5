//! Bounded agentic tool-calling loop for `LlmAgentSpec`-declared functions.
//!
//! The core depends only on [`ProviderAdapter`] — never a concrete model
//! SDK — the same seam `llmspell-agents`' `LLMAgent` draws around
//! `ProviderInstance`. Provider selection and the resolved tool set are both
//! frozen for the lifetime of one invocation: a topology change mid-loop must
//! not swap the schema an in-flight provider call was given.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::proxy::{ProxyError, ProxyInvoker, SlotKey};

/// Errors raised by the LLM agentic loop.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider call failed: {0}")]
    ProviderFailed(String),

    #[error("tool invocation failed: {0}")]
    ToolInvocation(#[from] ProxyError),

    #[error("failed to load system prompt template from {0}: {1}")]
    TemplateLoad(String, String),
}

/// A chat message role, provider-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the accumulated conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages: which tool call this is the result of.
    pub tool_call_id: Option<String>,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool made available to the provider for this invocation: name,
/// description and MCP-style JSON Schema, resolved once before the loop
/// starts (§4.4 freezes the tool set for the whole invocation).
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Option<Value>,
}

/// A tool call the provider asked for.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One provider turn: a message plus any tool calls it wants executed.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub message: ConversationMessage,
    pub tool_calls: Vec<ToolCallRequest>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The narrow seam between the agentic loop and a concrete model provider.
/// Providers are themselves often just another mesh capability reached
/// through the proxy invoker, but the loop doesn't need to know that.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Model identifier reported in `GenerationMeta`.
    fn model(&self) -> String;

    async fn complete(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolDescriptor],
    ) -> Result<ProviderResponse, LlmError>;
}

/// Usage/timing metadata returned alongside the loop's final output.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationMeta {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub iterations: u32,
    pub model: String,
}

/// Final result of one agentic loop invocation.
#[derive(Debug, Clone)]
pub struct LlmOutput {
    pub text: Option<String>,
    pub structured: Option<Value>,
    pub meta: GenerationMeta,
}

/// A bounded, single-invocation agentic tool-calling loop.
///
/// Built fresh per call with an already-resolved provider and tool set; the
/// loop itself never re-resolves either, so a topology change observed by
/// the heartbeat engine mid-loop has no effect on an in-flight invocation.
pub struct LlmLoop {
    provider: Arc<dyn ProviderAdapter>,
    tools: Vec<ToolDescriptor>,
    /// Maps a tool name exposed to the provider to the proxy slot that
    /// serves it, so a requested tool call can be dispatched without the
    /// loop needing registry knowledge of its own.
    tool_slots: Vec<(String, SlotKey)>,
    proxy: Arc<ProxyInvoker>,
    max_iterations: u32,
    /// Optional JSON Schema: if set, the loop also stops early once the
    /// latest assistant message parses against it (§4.4 stop condition c).
    structured_output_schema: Option<Value>,
}

impl LlmLoop {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        tools: Vec<ToolDescriptor>,
        tool_slots: Vec<(String, SlotKey)>,
        proxy: Arc<ProxyInvoker>,
        max_iterations: u32,
    ) -> Self {
        Self {
            provider,
            tools,
            tool_slots,
            proxy,
            max_iterations: max_iterations.max(1),
            structured_output_schema: None,
        }
    }

    pub fn with_structured_output_schema(mut self, schema: Value) -> Self {
        self.structured_output_schema = Some(schema);
        self
    }

    fn slot_for(&self, tool_name: &str) -> Option<&SlotKey> {
        self.tool_slots.iter().find(|(name, _)| name == tool_name).map(|(_, slot)| slot)
    }

    /// Run the loop to completion: render the system prompt, seed history,
    /// then alternate provider turns and tool invocations until a stop
    /// condition from §4.4 is met.
    pub async fn run(
        &self,
        system_prompt: String,
        history: Vec<ConversationMessage>,
        user_input: String,
    ) -> Result<LlmOutput, LlmError> {
        let started = Instant::now();
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ConversationMessage::system(system_prompt));
        messages.extend(history);
        messages.push(ConversationMessage::user(user_input));

        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        for iteration in 1..=self.max_iterations {
            let response = self.provider.complete(&messages, &self.tools).await?;
            input_tokens += response.input_tokens;
            output_tokens += response.output_tokens;

            if response.tool_calls.is_empty() {
                if let Some(structured) = self.try_parse_structured(&response.message.content) {
                    return Ok(self.finish(Some(structured), None, input_tokens, output_tokens, iteration, started));
                }
                return Ok(self.finish(
                    None,
                    Some(response.message.content.clone()),
                    input_tokens,
                    output_tokens,
                    iteration,
                    started,
                ));
            }

            messages.push(response.message.clone());

            for call in &response.tool_calls {
                let result = match self.slot_for(&call.name) {
                    Some(slot) => self.proxy.call(slot, call.arguments.clone()).await,
                    None => Err(ProxyError::ToolUnavailable { capability: call.name.clone() }),
                };

                let content = match result {
                    Ok(value) => value.to_string(),
                    Err(e) => serde_json::json!({"error": e.to_string()}).to_string(),
                };
                messages.push(ConversationMessage::tool_result(call.id.clone(), content));
            }
        }

        Ok(self.finish(None, None, input_tokens, output_tokens, self.max_iterations, started))
    }

    fn try_parse_structured(&self, content: &str) -> Option<Value> {
        let schema = self.structured_output_schema.as_ref()?;
        let parsed: Value = serde_json::from_str(content).ok()?;
        if matches_schema_shape(&parsed, schema) {
            Some(parsed)
        } else {
            None
        }
    }

    fn finish(
        &self,
        structured: Option<Value>,
        text: Option<String>,
        input_tokens: u64,
        output_tokens: u64,
        iterations: u32,
        started: Instant,
    ) -> LlmOutput {
        LlmOutput {
            text,
            structured,
            meta: GenerationMeta {
                input_tokens,
                output_tokens,
                latency_ms: started.elapsed().as_millis() as u64,
                iterations,
                model: self.provider.model(),
            },
        }
    }
}

/// Minimal structural check: every top-level property the schema requires is
/// present on the parsed value. Not a full JSON Schema validator - the loop
/// only needs "does this look like the declared shape", not strict
/// conformance.
fn matches_schema_shape(value: &Value, schema: &Value) -> bool {
    let (Some(obj), Some(required)) = (value.as_object(), schema.get("required").and_then(|r| r.as_array()))
    else {
        return value.is_object() && schema.get("required").is_none();
    };
    required.iter().filter_map(|r| r.as_str()).all(|key| obj.contains_key(key))
}

/// Render a `system_prompt_template`: inline text, or fetched from a
/// `file://`/`http(s)://` URI.
pub async fn render_system_prompt(template: &str, context: &std::collections::HashMap<String, String>) -> Result<String, LlmError> {
    let raw = if let Some(path) = template.strip_prefix("file://") {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LlmError::TemplateLoad(template.to_string(), e.to_string()))?
    } else if template.starts_with("http://") || template.starts_with("https://") {
        let response = reqwest::get(template)
            .await
            .map_err(|e| LlmError::TemplateLoad(template.to_string(), e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| LlmError::TemplateLoad(template.to_string(), e.to_string()))?
    } else {
        template.to_string()
    };

    let mut rendered = raw;
    for (key, value) in context {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        calls: AtomicU32,
        responses: Vec<ProviderResponse>,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        fn model(&self) -> String {
            "scripted-model".to_string()
        }

        async fn complete(
            &self,
            _messages: &[ConversationMessage],
            _tools: &[ToolDescriptor],
        ) -> Result<ProviderResponse, LlmError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.responses
                .get(idx)
                .cloned()
                .ok_or_else(|| LlmError::ProviderFailed("script exhausted".to_string()))
        }
    }

    #[tokio::test]
    async fn stops_on_final_message_with_no_tool_calls() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            responses: vec![ProviderResponse {
                message: ConversationMessage::assistant("all done"),
                tool_calls: vec![],
                input_tokens: 10,
                output_tokens: 5,
            }],
        });
        let proxy = Arc::new(ProxyInvoker::new("agent-1"));
        let loop_ = LlmLoop::new(provider, vec![], vec![], proxy, 5);

        let output = loop_.run("system".to_string(), vec![], "hi".to_string()).await.unwrap();
        assert_eq!(output.text.as_deref(), Some("all done"));
        assert_eq!(output.meta.iterations, 1);
    }

    #[tokio::test]
    async fn stops_after_max_iterations_when_provider_always_calls_tools() {
        let responses = (0..3)
            .map(|i| ProviderResponse {
                message: ConversationMessage::assistant("calling a tool"),
                tool_calls: vec![ToolCallRequest {
                    id: format!("call-{i}"),
                    name: "missing_tool".to_string(),
                    arguments: Value::Null,
                }],
                input_tokens: 1,
                output_tokens: 1,
            })
            .collect();
        let provider = Arc::new(ScriptedProvider { calls: AtomicU32::new(0), responses });
        let proxy = Arc::new(ProxyInvoker::new("agent-1"));
        let loop_ = LlmLoop::new(provider, vec![], vec![], proxy, 3);

        let output = loop_.run("system".to_string(), vec![], "go".to_string()).await.unwrap();
        assert_eq!(output.meta.iterations, 3);
        assert!(output.text.is_none());
        assert!(output.structured.is_none());
    }

    #[test]
    fn matches_schema_shape_requires_declared_fields() {
        let schema = serde_json::json!({"required": ["name"]});
        assert!(matches_schema_shape(&serde_json::json!({"name": "x"}), &schema));
        assert!(!matches_schema_shape(&serde_json::json!({"other": "x"}), &schema));
    }

    #[tokio::test]
    async fn render_system_prompt_substitutes_context() {
        let mut ctx = std::collections::HashMap::new();
        ctx.insert("name".to_string(), "hello-agent".to_string());
        let rendered = render_system_prompt("You are {{name}}.", &ctx).await.unwrap();
        assert_eq!(rendered, "You are hello-agent.");
    }
}
