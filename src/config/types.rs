//! Configuration type definitions for ClawLoop
//!
//! Every section implements serde with `#[serde(default)]`, so a config file
//! only needs the keys it wants to change.

use serde::{Deserialize, Serialize};

/// Main configuration struct for ClawLoop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent loop settings (model, iterations, prompt)
    pub agent: AgentDefaults,
    /// Retry behavior for model calls
    pub retry: RetryConfig,
    /// Long-term memory and consolidation
    pub memory: MemoryConfig,
    /// Session storage and windowing
    pub session: SessionConfig,
    /// Built-in tool settings
    pub tools: ToolsConfig,
    /// Message bus capacities
    pub bus: BusConfig,
    /// Skill selection
    pub skills: SkillsConfig,
    /// Log output
    pub logging: LoggingConfig,
}

// ============================================================================
// Agent
// ============================================================================

/// Default bootstrap instructions placed first in every system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are ClawLoop, a helpful personal assistant. \
Answer concisely. Use the available tools when they help you give a correct answer, \
and say so plainly when you cannot do something.";

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Workspace directory (memory files and tool sandbox). `~` is expanded.
    pub workspace: String,
    /// Model passed to the provider; empty = provider default
    pub model: String,
    /// Maximum tokens for responses
    pub max_tokens: u32,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum tool-execution rounds per turn
    pub max_tool_iterations: u32,
    /// Timeout for a single model attempt, in seconds
    pub model_timeout_secs: u64,
    /// Stream partial answers as chunk messages
    pub streaming: bool,
    /// Bootstrap/identity instructions
    pub system_prompt: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.clawloop/workspace".to_string(),
            model: String::new(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
            model_timeout_secs: 120,
            streaming: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Retry behavior for model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable automatic retry for transient provider errors.
    pub enabled: bool,
    /// Total attempts per model call, including the first (0 acts as 1).
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds for exponential backoff.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Long-term memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Record history and consolidate it into long-term memory
    pub enabled: bool,
    /// Consolidate once this many history entries are unarchived
    pub consolidation_threshold: u64,
    /// History entries summarized per consolidation run
    pub batch_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consolidation_threshold: 40,
            batch_size: 50,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session storage and prompt window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum turns in the prompt window
    pub window_turns: usize,
    /// Optional token budget for the window; takes precedence when set
    pub window_tokens: Option<usize>,
    /// Directory for session logs; defaults to `~/.clawloop/sessions`
    pub storage_dir: Option<String>,
    /// Newest turns of each session kept in memory; older ones stay on disk
    pub cache_turns: usize,
    /// Idle sessions beyond this count are dropped from memory
    pub max_cached_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_turns: 40,
            window_tokens: None,
            storage_dir: None,
            cache_turns: 200,
            max_cached_sessions: 1024,
        }
    }
}

// ============================================================================
// Tools
// ============================================================================

/// Built-in tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-call timeout enforced by the executor
    pub timeout_secs: u64,
    /// Timeout for a single shell command
    pub shell_timeout_secs: u64,
    /// Extra regex patterns rejected by the shell tool
    pub shell_blocklist: Vec<String>,
    /// Maximum response bytes read by web_fetch
    pub web_max_bytes: usize,
    /// Built-in tools to leave out
    pub disabled: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            shell_timeout_secs: 30,
            shell_blocklist: Vec::new(),
            web_max_bytes: 200_000,
            disabled: Vec::new(),
        }
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Message bus capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Inbound messages held across all sessions
    pub inbound_capacity: usize,
    /// Outbound messages awaiting delivery
    pub outbound_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 100,
            outbound_capacity: 100,
        }
    }
}

// ============================================================================
// Skills
// ============================================================================

/// Skill selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    /// Skills whose full content is always placed in the prompt
    pub always_load: Vec<String>,
    /// Skills to drop entirely
    pub disabled: Vec<String>,
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Compact single-line output; pair with `log_component!`
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Append logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}
