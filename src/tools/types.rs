//! Tool types for ClawLoop
//!
//! This module defines the core types for tool execution: the `Tool` trait
//! every capability implements, the `ToolContext` handed to each call, and
//! the `ToolResult` the executor always produces.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Capability tag of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Read-only filesystem operations (read, list).
    FilesystemRead,
    /// Write/modify filesystem operations.
    FilesystemWrite,
    /// Read-only network operations (fetch).
    NetworkRead,
    /// Shell command execution.
    Shell,
    /// Memory and history lookups.
    Memory,
    /// Sending messages through the bus.
    Messaging,
    /// Side-effect free helpers.
    Utility,
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FilesystemRead => write!(f, "filesystem_read"),
            Self::FilesystemWrite => write!(f, "filesystem_write"),
            Self::NetworkRead => write!(f, "network_read"),
            Self::Shell => write!(f, "shell"),
            Self::Memory => write!(f, "memory"),
            Self::Messaging => write!(f, "messaging"),
            Self::Utility => write!(f, "utility"),
        }
    }
}

/// What a tool implementation returns.
///
/// Separates what the model sees (`for_llm`) from an optional line meant
/// for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Content fed back to the model. Always present.
    pub for_llm: String,
    /// Content shown to the user. `None` = silent.
    pub for_user: Option<String>,
    /// Whether this result represents an error condition.
    pub is_error: bool,
}

impl ToolOutput {
    /// Model-only result. User sees nothing.
    pub fn llm_only(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            is_error: false,
        }
    }

    /// Both model and user see the same content.
    pub fn user_visible(content: impl Into<String>) -> Self {
        let s = content.into();
        Self {
            for_llm: s.clone(),
            for_user: Some(s),
            is_error: false,
        }
    }

    /// Error result reported to the model.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            is_error: true,
        }
    }
}

/// The outcome of one tool call as fed back to the model.
///
/// Produced for every call, whether the tool ran, failed, timed out or
/// did not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools must implement.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use clawloop::tools::{Tool, ToolCategory, ToolContext, ToolOutput};
/// use clawloop::error::Result;
///
/// struct MyTool;
///
/// #[async_trait]
/// impl Tool for MyTool {
///     fn name(&self) -> &str { "my_tool" }
///     fn description(&self) -> &str { "Does something useful" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({
///             "type": "object",
///             "properties": {},
///             "required": []
///         })
///     }
///     fn category(&self) -> ToolCategory { ToolCategory::Utility }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
///         Ok(ToolOutput::llm_only("Done!"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to request this tool.
    fn name(&self) -> &str;

    /// Description sent to the model so it knows when to use the tool.
    fn description(&self) -> &str;

    /// JSON schema of the arguments. Calls are validated against it before
    /// `execute` runs.
    fn parameters(&self) -> Value;

    /// Capability tag.
    fn category(&self) -> ToolCategory;

    /// Resource this call touches, if any.
    ///
    /// Calls in one batch that report the same key never run concurrently;
    /// they execute in the order the model listed them.
    fn resource_key(&self, _args: &Value) -> Option<String> {
        None
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Session the call belongs to
    pub session_key: Option<String>,
    /// The channel name (e.g., "telegram", "cli")
    pub channel: Option<String>,
    /// The chat/conversation ID within the channel
    pub chat_id: Option<String>,
    /// Root directory for file operations
    pub workspace: Option<PathBuf>,
    /// Cancelled when the turn that issued the call is abandoned
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Create a new empty tool context.
    ///
    /// # Example
    /// ```
    /// use clawloop::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new();
    /// assert!(ctx.channel.is_none());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the originating session.
    pub fn with_session(mut self, session_key: &str) -> Self {
        self.session_key = Some(session_key.to_string());
        self
    }

    /// Set the channel and chat ID.
    ///
    /// # Example
    /// ```
    /// use clawloop::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new().with_channel("telegram", "123456");
    /// assert_eq!(ctx.channel.as_deref(), Some("telegram"));
    /// assert_eq!(ctx.chat_id.as_deref(), Some("123456"));
    /// ```
    pub fn with_channel(mut self, channel: &str, chat_id: &str) -> Self {
        self.channel = Some(channel.to_string());
        self.chat_id = Some(chat_id.to_string());
        self
    }

    /// Set the workspace directory.
    pub fn with_workspace(mut self, workspace: impl AsRef<Path>) -> Self {
        self.workspace = Some(workspace.as_ref().to_path_buf());
        self
    }

    /// Use the given cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
