//! ClawLoop - conversational agent runtime core
//!
//! Chat adapters publish messages onto the [`MessageBus`]; the
//! [`AgentLoop`] runs one worker per session, assembles context from the
//! [`SessionStore`] and [`MemoryStore`], drives the model through tool
//! rounds and publishes the answer back onto the bus.

pub mod agent;
pub mod bus;
pub mod channels;
pub mod config;
pub mod error;
pub mod memory;
pub mod providers;
pub mod session;
pub mod skills;
pub mod tools;
pub mod utils;

pub use agent::{AgentLoop, ContextBuilder, RuntimeContext, TurnState};
pub use bus::{
    BusEvent, InboundMessage, MediaAttachment, MediaType, MessageBus, OutboundKind,
    OutboundMessage,
};
pub use config::Config;
pub use error::{ClawError, ProviderError, Result};
pub use memory::{MemoryRecord, MemoryStore};
pub use providers::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, RetryProvider, StreamEvent,
    ToolDefinition, Usage,
};
pub use session::{Message, Role, Session, SessionStore, ToolCall, Turn, WindowLimit};
pub use skills::{SkillManifest, SkillTable};
pub use tools::{Tool, ToolExecutor, ToolRegistry, ToolResult};
