//! Context builder for agent conversations
//!
//! Assembles the system prompt and the model-facing message list for a turn.
//! The system prompt is always laid out in the same order:
//!
//! 1. bootstrap / identity instructions
//! 2. long-term memory digest
//! 3. skills (always-loaded verbatim, the rest as one-liners)
//! 4. runtime facts
//!
//! followed by the chronological turn window.

use std::collections::HashMap;

use crate::bus::MediaAttachment;
use crate::config::DEFAULT_SYSTEM_PROMPT;
use crate::session::{InlineMedia, Message, Role, ToolCall, Turn};
use crate::skills::SkillTable;

/// Facts about the environment a turn runs in.
///
/// # Example
///
/// ```rust
/// use clawloop::agent::RuntimeContext;
///
/// let ctx = RuntimeContext::new()
///     .with_channel("telegram")
///     .with_tools(vec!["shell".to_string(), "web_fetch".to_string()]);
///
/// let rendered = ctx.render().unwrap();
/// assert!(rendered.contains("Channel: telegram"));
/// assert!(rendered.contains("shell, web_fetch"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub channel: Option<String>,
    pub available_tools: Vec<String>,
    /// RFC 3339 timestamp
    pub current_time: Option<String>,
    pub workspace: Option<String>,
    /// e.g. "linux x86_64"
    pub os_info: Option<String>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }

    /// Stamp the current UTC time.
    pub fn with_current_time(mut self) -> Self {
        self.current_time = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = Some(workspace.to_string());
        self
    }

    pub fn with_os_info(mut self) -> Self {
        self.os_info = Some(format!(
            "{} {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
            && self.available_tools.is_empty()
            && self.current_time.is_none()
            && self.workspace.is_none()
            && self.os_info.is_none()
    }

    /// Render as a markdown section, or `None` if nothing is set.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut parts = Vec::new();
        if let Some(ref time) = self.current_time {
            parts.push(format!("- Current time: {}", time));
        }
        if let Some(ref channel) = self.channel {
            parts.push(format!("- Channel: {}", channel));
        }
        if !self.available_tools.is_empty() {
            parts.push(format!(
                "- Available tools: {}",
                self.available_tools.join(", ")
            ));
        }
        if let Some(ref workspace) = self.workspace {
            parts.push(format!("- Workspace: {}", workspace));
        }
        if let Some(ref os) = self.os_info {
            parts.push(format!("- Platform: {}", os));
        }

        Some(format!("## Runtime Context\n\n{}", parts.join("\n")))
    }
}

/// Builds system prompts and message lists.
///
/// # Example
///
/// ```rust
/// use clawloop::agent::{ContextBuilder, RuntimeContext};
/// use clawloop::session::{Role, Turn};
/// use clawloop::skills::SkillTable;
///
/// let builder = ContextBuilder::new().with_bootstrap("You are terse.");
/// let system = builder.build_system_prompt("cli:local", 0, "", &SkillTable::default(), &RuntimeContext::new());
/// assert_eq!(system, "You are terse.");
///
/// let messages = builder.build_messages(&system, &[Turn::user("2+2?")]);
/// assert_eq!(messages.len(), 2);
/// assert_eq!(messages[1].role, Role::User);
/// ```
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    bootstrap: String,
}

impl ContextBuilder {
    /// Builder with the default bootstrap instructions.
    pub fn new() -> Self {
        Self {
            bootstrap: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the bootstrap / identity instructions.
    pub fn with_bootstrap(mut self, prompt: &str) -> Self {
        self.bootstrap = prompt.to_string();
        self
    }

    pub fn bootstrap(&self) -> &str {
        &self.bootstrap
    }

    /// Assemble the system prompt for the session `session_key`, which has
    /// `prior_turns` turns recorded so far.
    ///
    /// `memory_digest` is the rendered long-term memory block; empty blocks
    /// are left out entirely.
    pub fn build_system_prompt(
        &self,
        session_key: &str,
        prior_turns: usize,
        memory_digest: &str,
        skills: &SkillTable,
        runtime: &RuntimeContext,
    ) -> String {
        let mut sections: Vec<String> = Vec::with_capacity(4);

        if !self.bootstrap.trim().is_empty() {
            sections.push(self.bootstrap.trim().to_string());
        }
        if !memory_digest.trim().is_empty() {
            sections.push(memory_digest.trim().to_string());
        }
        let skills_block = skills.render_summary();
        if !skills_block.is_empty() {
            sections.push(skills_block);
        }
        if let Some(mut rendered) = runtime.render() {
            rendered.push_str(&format!(
                "\n- Session: {} ({} prior turns)",
                session_key, prior_turns
            ));
            sections.push(rendered);
        }

        sections.join("\n\n")
    }

    /// System message followed by the window, converted for the model.
    ///
    /// Error turns are skipped, as are tool results whose call is not in
    /// the window.
    pub fn build_messages(&self, system_prompt: &str, window: &[Turn]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.push(Message::system(system_prompt));

        // call id -> tool name, for calls issued inside this window
        let mut issued: HashMap<&str, &str> = HashMap::new();

        for turn in window {
            match turn.role {
                Role::Error | Role::System => continue,
                Role::User => messages.push(user_message(turn)),
                Role::Assistant => {
                    for call in &turn.tool_calls {
                        issued.insert(call.id.as_str(), call.name.as_str());
                    }
                    let mut msg = if turn.has_tool_calls() {
                        Message::assistant_with_tools(&turn.content, turn.tool_calls.clone())
                    } else {
                        Message::assistant(&turn.content)
                    };
                    attach_media(&mut msg, &turn.attachments);
                    messages.push(msg);
                }
                Role::Tool => {
                    let Some(id) = turn.tool_call_id.as_deref() else {
                        continue;
                    };
                    let Some(name) = issued.get(id) else {
                        continue;
                    };
                    messages.push(Message::tool_result(id, Some(name), &turn.content));
                }
            }
        }

        messages
    }

    /// Append a tool result to a running message list.
    pub fn add_tool_result(
        &self,
        messages: &mut Vec<Message>,
        tool_call_id: &str,
        name: &str,
        content: &str,
    ) {
        messages.push(Message::tool_result(tool_call_id, Some(name), content));
    }

    /// Append an assistant message (with any tool calls) to a running message list.
    pub fn add_assistant_message(
        &self,
        messages: &mut Vec<Message>,
        content: &str,
        tool_calls: Vec<ToolCall>,
    ) {
        messages.push(Message::assistant_with_tools(content, tool_calls));
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn user_message(turn: &Turn) -> Message {
    let mut msg = Message::user(&turn.content);
    attach_media(&mut msg, &turn.attachments);
    msg
}

/// Inline data becomes a media block; URL-only attachments become a text reference.
fn attach_media(msg: &mut Message, attachments: &[MediaAttachment]) {
    for attachment in attachments {
        if let Some(ref data) = attachment.data {
            msg.media.push(InlineMedia {
                mime_type: attachment.effective_mime().to_string(),
                data_base64: data.clone(),
            });
        } else if let Some(ref url) = attachment.url {
            let label = attachment.filename.as_deref().unwrap_or("attachment");
            if !msg.content.is_empty() {
                msg.content.push('\n');
            }
            msg.content.push_str(&format!(
                "[{} {}: {}]",
                attachment.effective_mime(),
                label,
                url
            ));
        }
    }
}
