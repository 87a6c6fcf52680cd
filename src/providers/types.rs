//! Provider types for ClawLoop
//!
//! This module defines the contract every LLM client wrapper satisfies:
//! the `LLMProvider` trait, chat options, and response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{ProviderError, Result};
use crate::session::{Message, ToolCall};

/// Definition of a tool that can be called by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (must be unique)
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    ///
    /// # Example
    /// ```
    /// use clawloop::providers::ToolDefinition;
    /// use serde_json::json;
    ///
    /// let tool = ToolDefinition::new(
    ///     "web_fetch",
    ///     "Fetch a URL",
    ///     json!({
    ///         "type": "object",
    ///         "properties": { "url": { "type": "string" } },
    ///         "required": ["url"]
    ///     }),
    /// );
    /// assert_eq!(tool.name, "web_fetch");
    /// ```
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Events produced by a streaming chat request.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A partial piece of response text
    Delta(String),
    /// Tool calls requested by the model
    ToolCalls(Vec<LLMToolCall>),
    /// The stream finished successfully
    Done { usage: Option<Usage> },
    /// The stream failed after it started
    Error(ProviderError),
}

/// Trait for LLM providers (OpenAI, Anthropic, local models, etc.).
///
/// Implementations translate between ClawLoop's message format and the
/// provider's API. Failures must be reported as typed errors
/// ([`ProviderError`]), never as silent empty responses.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a chat completion request to the LLM.
    ///
    /// # Arguments
    /// * `messages` - The ordered prompt
    /// * `tools` - Tools the LLM may call
    /// * `model` - Optional model override (uses default if None)
    /// * `options` - Sampling parameters
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse>;

    /// Stream a chat completion as partial deltas.
    ///
    /// The default implementation performs a regular [`chat`](Self::chat)
    /// and replays the result as a single delta.
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self.chat(messages, tools, model, options).await?;
        let (tx, rx) = mpsc::channel(4);
        if !response.content.is_empty() {
            let _ = tx.send(StreamEvent::Delta(response.content)).await;
        }
        if !response.tool_calls.is_empty() {
            let _ = tx.send(StreamEvent::ToolCalls(response.tool_calls)).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: response.usage,
            })
            .await;
        Ok(rx)
    }

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Get the provider name.
    fn name(&self) -> &str;
}

/// Options for chat completion requests.
///
/// Use the builder pattern to construct options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter
    pub top_p: Option<f32>,
    /// Stop sequences that halt generation
    pub stop: Option<Vec<String>>,
}

impl ChatOptions {
    /// Create new default chat options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tokens to generate.
    ///
    /// # Example
    /// ```
    /// use clawloop::providers::ChatOptions;
    ///
    /// let options = ChatOptions::new().with_max_tokens(1000).with_temperature(0.2);
    /// assert_eq!(options.max_tokens, Some(1000));
    /// assert_eq!(options.temperature, Some(0.2));
    /// ```
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature for sampling.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the top_p (nucleus sampling) parameter.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set stop sequences that will halt generation.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Response from an LLM chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Text content of the response
    pub content: String,
    /// Tool calls made by the LLM (if any)
    pub tool_calls: Vec<LLMToolCall>,
    /// Token usage information (if available)
    pub usage: Option<Usage>,
}

impl LLMResponse {
    /// Create a simple text response with no tool calls.
    ///
    /// # Example
    /// ```
    /// use clawloop::providers::LLMResponse;
    ///
    /// let response = LLMResponse::text("Hello, world!");
    /// assert!(!response.has_tool_calls());
    /// ```
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            tool_calls: vec![],
            usage: None,
        }
    }

    /// Create a response with tool calls.
    pub fn with_tools(content: &str, tool_calls: Vec<LLMToolCall>) -> Self {
        Self {
            content: content.to_string(),
            tool_calls,
            usage: None,
        }
    }

    /// Attach usage information (builder pattern).
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Check if this response contains any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call exactly as the LLM emitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMToolCall {
    /// Provider-assigned call id (may be empty for some providers)
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// Raw JSON arguments string
    pub arguments: String,
}

impl LLMToolCall {
    /// Create a new tool call.
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the arguments string as JSON.
    pub fn parse_arguments(&self) -> std::result::Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }

    /// Convert into a structured [`ToolCall`].
    ///
    /// Arguments that are not valid JSON are kept as a raw string so that
    /// schema validation reports them back to the model. A missing id is
    /// replaced with a generated one.
    pub fn to_tool_call(&self) -> ToolCall {
        let arguments = self
            .parse_arguments()
            .unwrap_or_else(|_| Value::String(self.arguments.clone()));
        let id = if self.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.id.clone()
        };
        ToolCall::new(&id, &self.name, arguments)
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Create usage from prompt and completion counts.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LLMResponse::with_tools(
                &last,
                vec![LLMToolCall::new("c1", "echo", "{}")],
            ))
        }

        fn default_model(&self) -> &str {
            "echo-1"
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_tool_call_parsing() {
        let call = LLMToolCall::new("c1", "read_file", r#"{"path":"a.txt"}"#);
        let parsed = call.to_tool_call();
        assert_eq!(parsed.id, "c1");
        assert_eq!(parsed.arguments, json!({"path": "a.txt"}));
    }

    #[test]
    fn test_tool_call_bad_json_kept_raw() {
        let call = LLMToolCall::new("c1", "read_file", "{path:");
        assert!(call.parse_arguments().is_err());
        assert_eq!(call.to_tool_call().arguments, json!("{path:"));
    }

    #[test]
    fn test_tool_call_empty_args_and_id() {
        let call = LLMToolCall::new("", "list_dir", "");
        let parsed = call.to_tool_call();
        assert!(parsed.id.starts_with("call_"));
        assert_eq!(parsed.arguments, json!({}));
    }

    #[test]
    fn test_usage_totals() {
        let usage = Usage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_default_chat_stream_replays_response() {
        let provider = EchoProvider;
        let mut rx = provider
            .chat_stream(vec![Message::user("hi")], vec![], None, ChatOptions::new())
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            StreamEvent::Delta(text) => assert_eq!(text, "hi"),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            StreamEvent::ToolCalls(calls) => assert_eq!(calls.len(), 1),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Done { .. }));
        assert!(rx.recv().await.is_none());
    }
}
