//! Message types for the ClawLoop message bus
//!
//! This module defines the records that travel between channel adapters and
//! the agent loop. Inbound messages are immutable once enqueued.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents an incoming message from a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Session key for routing (default format: "channel:chat_id")
    pub session_key: String,
    /// The channel this message came from (e.g., "telegram", "cli")
    pub channel: String,
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Unique identifier of the chat/conversation
    pub chat_id: String,
    /// The text content of the message
    pub content: String,
    /// Media attachments, in the order the sender supplied them
    #[serde(default)]
    pub attachments: Vec<MediaAttachment>,
    /// When the adapter received the message
    pub received_at: DateTime<Utc>,
    /// Additional metadata key-value pairs
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What an outbound message represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    /// The answer that completes a turn
    #[default]
    Final,
    /// A streamed partial delta of the answer in progress
    Chunk,
    /// A user-visible failure report that completes a turn
    Error,
    /// Out-of-band notices (command replies, proactive tool messages)
    Notice,
}

/// Represents an outgoing message to be sent via a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Session this message belongs to
    pub session_key: String,
    /// The channel to send this message through
    pub channel: String,
    /// The chat/conversation (recipient) to send to
    pub chat_id: String,
    /// The text content to send
    pub content: String,
    /// Media to send alongside the text
    #[serde(default)]
    pub attachments: Vec<MediaAttachment>,
    /// Optional message ID to reply to
    pub reply_to: Option<String>,
    /// Final answer, streamed chunk, error, or notice
    #[serde(default)]
    pub kind: OutboundKind,
}

/// Represents a media attachment (image, audio, video, or document)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaAttachment {
    /// The type of media
    pub media_type: MediaType,
    /// MIME type, when known (e.g. "image/png")
    #[serde(default)]
    pub mime_type: Option<String>,
    /// URL to the media (if hosted remotely)
    #[serde(default)]
    pub url: Option<String>,
    /// Base64-encoded payload (if available locally)
    #[serde(default)]
    pub data: Option<String>,
    /// Original filename
    #[serde(default)]
    pub filename: Option<String>,
}

/// Types of media that can be attached to messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// Image files (PNG, JPG, GIF, etc.)
    Image,
    /// Audio files (MP3, WAV, OGG, etc.)
    Audio,
    /// Video files (MP4, WebM, etc.)
    Video,
    /// Document files (PDF, DOCX, etc.)
    Document,
}

impl MediaType {
    /// Fallback MIME type when the adapter did not supply one.
    pub fn default_mime(&self) -> &'static str {
        match self {
            MediaType::Image => "image/png",
            MediaType::Audio => "audio/mpeg",
            MediaType::Video => "video/mp4",
            MediaType::Document => "application/octet-stream",
        }
    }
}

impl InboundMessage {
    /// Creates a new inbound message with the required fields.
    ///
    /// The session key is automatically generated as "channel:chat_id".
    ///
    /// # Example
    /// ```
    /// use clawloop::bus::message::InboundMessage;
    ///
    /// let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello, bot!");
    /// assert_eq!(msg.session_key, "telegram:chat456");
    /// ```
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            session_key: format!("{}:{}", channel, chat_id),
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            attachments: Vec::new(),
            received_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Overrides the derived session key (builder pattern).
    ///
    /// Adapters that thread several chats into one conversation use this.
    pub fn with_session_key(mut self, key: &str) -> Self {
        self.session_key = key.to_string();
        self
    }

    /// Attaches media to the message (builder pattern).
    ///
    /// # Example
    /// ```
    /// use clawloop::bus::message::{InboundMessage, MediaAttachment, MediaType};
    ///
    /// let media = MediaAttachment::new(MediaType::Image).with_url("https://example.com/image.png");
    /// let msg = InboundMessage::new("telegram", "user123", "chat456", "Check this out!")
    ///     .with_attachment(media);
    /// assert!(msg.has_media());
    /// ```
    pub fn with_attachment(mut self, media: MediaAttachment) -> Self {
        self.attachments.push(media);
        self
    }

    /// Adds a metadata key-value pair to the message (builder pattern).
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Checks if this message has any media attached.
    pub fn has_media(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Returns the slash command this message carries, if any.
    ///
    /// Only the first whitespace-delimited token is considered.
    pub fn command(&self) -> Option<&str> {
        let first = self.content.trim().split_whitespace().next()?;
        first.starts_with('/').then_some(first)
    }
}

impl OutboundMessage {
    /// Creates a new final outbound message.
    ///
    /// # Example
    /// ```
    /// use clawloop::bus::message::OutboundMessage;
    ///
    /// let msg = OutboundMessage::new("cli:local", "cli", "local", "Hi!");
    /// assert_eq!(msg.session_key, "cli:local");
    /// assert!(msg.reply_to.is_none());
    /// ```
    pub fn new(session_key: &str, channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            session_key: session_key.to_string(),
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            attachments: Vec::new(),
            reply_to: None,
            kind: OutboundKind::Final,
        }
    }

    /// Addresses a message back to the sender of an inbound message.
    pub fn reply_to(msg: &InboundMessage, content: &str) -> Self {
        let mut out = Self::new(&msg.session_key, &msg.channel, &msg.chat_id, content);
        out.reply_to = msg.metadata.get("message_id").cloned();
        out
    }

    /// Sets the message ID to reply to (builder pattern).
    pub fn with_reply(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    /// Sets the message kind (builder pattern).
    pub fn with_kind(mut self, kind: OutboundKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches media to the message (builder pattern).
    pub fn with_attachment(mut self, media: MediaAttachment) -> Self {
        self.attachments.push(media);
        self
    }

    /// True for messages that close out a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, OutboundKind::Final | OutboundKind::Error)
    }
}

impl MediaAttachment {
    /// Creates a new media attachment of the specified type.
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            mime_type: None,
            url: None,
            data: None,
            filename: None,
        }
    }

    /// Sets the URL for the media (builder pattern).
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Stores raw bytes, base64-encoding them (builder pattern).
    ///
    /// # Example
    /// ```
    /// use clawloop::bus::message::{MediaAttachment, MediaType};
    ///
    /// let media = MediaAttachment::new(MediaType::Image).with_bytes(b"png");
    /// assert_eq!(media.data.as_deref(), Some("cG5n"));
    /// ```
    pub fn with_bytes(mut self, bytes: &[u8]) -> Self {
        self.data = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        self
    }

    /// Sets the MIME type (builder pattern).
    pub fn with_mime_type(mut self, mime: &str) -> Self {
        self.mime_type = Some(mime.to_string());
        self
    }

    /// Sets the filename for the media (builder pattern).
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    /// Checks if this attachment carries an inline payload.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Checks if this attachment has a URL.
    pub fn has_url(&self) -> bool {
        self.url.is_some()
    }

    /// MIME type to advertise, falling back to the media type default.
    pub fn effective_mime(&self) -> &str {
        self.mime_type
            .as_deref()
            .unwrap_or_else(|| self.media_type.default_mime())
    }
}
