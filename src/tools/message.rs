//! Message tool for proactive outbound messages.
//!
//! Lets the model send a message before its final answer, e.g. a progress
//! note, or to a different chat on a known channel. Messages go out as
//! [`OutboundKind::Notice`] so they never count as a turn's final reply.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::{MessageBus, OutboundKind, OutboundMessage};
use crate::error::{ClawError, Result};

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

/// Tool for sending outbound messages through the bus.
pub struct MessageTool {
    bus: MessageBus,
}

impl MessageTool {
    /// Create a new message tool publishing on `bus`.
    pub fn new(bus: MessageBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user right away, before the final answer. \
         Defaults to the current conversation."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Messaging
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "Message text to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Destination channel. Omit to use the current one."
                },
                "chat_id": {
                    "type": "string",
                    "description": "Destination chat ID. Omit to use the current one."
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClawError::Tool("Missing 'content' argument".to_string()))?;

        let channel = args
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| ctx.channel.clone())
            .ok_or_else(|| ClawError::Tool("No target channel specified".to_string()))?;
        let chat_id = args
            .get("chat_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| ctx.chat_id.clone())
            .ok_or_else(|| ClawError::Tool("No target chat_id specified".to_string()))?;

        let same_chat = ctx.channel.as_deref() == Some(channel.as_str())
            && ctx.chat_id.as_deref() == Some(chat_id.as_str());
        let session_key = match (&ctx.session_key, same_chat) {
            (Some(key), true) => key.clone(),
            _ => format!("{}:{}", channel, chat_id),
        };

        let outbound = OutboundMessage::new(&session_key, &channel, &chat_id, content)
            .with_kind(OutboundKind::Notice);
        self.bus.publish_outbound(outbound)?;

        Ok(ToolOutput::llm_only(format!(
            "Message sent to {}:{}",
            channel, chat_id
        )))
    }
}
