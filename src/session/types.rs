//! Session types for ClawLoop
//!
//! A [`Session`] is an ordered, append-only log of [`Turn`]s. A [`Message`]
//! is the model-facing view of a turn that the context builder assembles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::MediaAttachment;
use crate::utils::string::estimate_tokens;

/// Role of a turn or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Prompt preamble; only appears in built message lists
    System,
    /// Message from the user
    User,
    /// Message from the model
    Assistant,
    /// Result of a tool execution
    Tool,
    /// A turn that failed; recorded for the user, never sent to the model
    Error,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A structured tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// Arguments, validated against the tool's schema before execution
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call.
    ///
    /// # Example
    /// ```
    /// use clawloop::session::ToolCall;
    /// use serde_json::json;
    ///
    /// let call = ToolCall::new("call_1", "read_file", json!({"path": "notes.txt"}));
    /// assert_eq!(call.name, "read_file");
    /// ```
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }
}

/// One logged unit of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced this turn
    pub role: Role,
    /// Text content
    pub content: String,
    /// Tool calls requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool turns, the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool turns, whether the tool reported failure
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Media that arrived with (or was produced by) this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<MediaAttachment>,
    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn base(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            attachments: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// A user turn.
    pub fn user(content: &str) -> Self {
        Self::base(Role::User, content)
    }

    /// An assistant turn with no tool calls.
    pub fn assistant(content: &str) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// An assistant turn that requested tools.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        let mut turn = Self::base(Role::Assistant, content);
        turn.tool_calls = tool_calls;
        turn
    }

    /// A tool result turn linked to the call that produced it.
    pub fn tool_result(tool_call_id: &str, content: &str, is_error: bool) -> Self {
        let mut turn = Self::base(Role::Tool, content);
        turn.tool_call_id = Some(tool_call_id.to_string());
        turn.is_error = is_error;
        turn
    }

    /// A failed turn.
    pub fn error(content: &str) -> Self {
        let mut turn = Self::base(Role::Error, content);
        turn.is_error = true;
        turn
    }

    /// Attach media (builder pattern).
    pub fn with_attachments(mut self, attachments: Vec<MediaAttachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Check if this turn requested tools.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Rough token cost of this turn.
    pub fn estimated_tokens(&self) -> usize {
        let calls: usize = self
            .tool_calls
            .iter()
            .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments.to_string()))
            .sum();
        estimate_tokens(&self.content) + calls
    }
}

/// A conversation session.
///
/// Turns are only ever appended through the session store; this struct is
/// the read view handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session (e.g., "telegram:chat123")
    pub key: String,
    /// Ordered turn log
    pub turns: Vec<Turn>,
    /// When this session was created
    pub created_at: DateTime<Utc>,
    /// When a turn was last appended
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the given key.
    ///
    /// # Example
    /// ```
    /// use clawloop::session::Session;
    ///
    /// let session = Session::new("telegram:chat123");
    /// assert!(session.is_empty());
    /// ```
    pub fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            turns: Vec::new(),
            created_at: now,
            last_active_at: now,
        }
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.last_active_at = turn.timestamp;
        self.turns.push(turn);
    }

    /// Get the number of turns in this session.
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Check if this session is empty (no turns).
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Get the last turn in this session, if any.
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Get turns by role.
    pub fn turns_by_role(&self, role: Role) -> Vec<&Turn> {
        self.turns.iter().filter(|t| t.role == role).collect()
    }
}

/// An inline, base64-encoded media block attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data_base64: String,
}

/// A message in the list sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Text content of the message
    pub content: String,
    /// Inline media blocks belonging to this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<InlineMedia>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool results, the call this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool results, the tool's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn base(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            media: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a system message.
    pub fn system(content: &str) -> Self {
        Self::base(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: &str) -> Self {
        Self::base(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: &str) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// Create an assistant message that requests tools.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::base(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: &str, name: Option<&str>, content: &str) -> Self {
        let mut msg = Self::base(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.to_string());
        msg.name = name.map(str::to_string);
        msg
    }

    /// Check if this message has tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Check if this message is a tool result.
    pub fn is_tool_result(&self) -> bool {
        self.tool_call_id.is_some()
    }
}
