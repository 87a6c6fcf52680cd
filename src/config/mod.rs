//! Configuration management for ClawLoop
//!
//! Configuration is loaded from `~/.clawloop/config.json`, then environment
//! variables of the form `CLAWLOOP_SECTION_KEY` override individual values.

mod types;

pub use types::*;

use std::path::{Path, PathBuf};

use crate::error::{ClawError, Result};

/// Parse an environment variable into `target`, ignoring values that don't parse.
fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Some(v) = std::env::var(name).ok().and_then(|val| val.parse().ok()) {
        *target = v;
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) => {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(rest.trim_start_matches(['/', '\\']))
        }
        None => PathBuf::from(path),
    }
}

impl Config {
    /// Returns the ClawLoop configuration directory path (~/.clawloop)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clawloop")
    }

    /// Returns the path to the config file (~/.clawloop/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// A missing file yields the default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                ClawError::Config(format!("Invalid config file {}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CLAWLOOP_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        // Agent
        if let Ok(val) = std::env::var("CLAWLOOP_AGENT_WORKSPACE") {
            self.agent.workspace = val;
        }
        if let Ok(val) = std::env::var("CLAWLOOP_AGENT_MODEL") {
            self.agent.model = val;
        }
        env_parse("CLAWLOOP_AGENT_MAX_TOKENS", &mut self.agent.max_tokens);
        env_parse("CLAWLOOP_AGENT_TEMPERATURE", &mut self.agent.temperature);
        env_parse(
            "CLAWLOOP_AGENT_MAX_TOOL_ITERATIONS",
            &mut self.agent.max_tool_iterations,
        );
        env_parse(
            "CLAWLOOP_AGENT_MODEL_TIMEOUT_SECS",
            &mut self.agent.model_timeout_secs,
        );
        env_parse("CLAWLOOP_AGENT_STREAMING", &mut self.agent.streaming);

        // Retry
        env_parse("CLAWLOOP_RETRY_ENABLED", &mut self.retry.enabled);
        env_parse("CLAWLOOP_RETRY_MAX_RETRIES", &mut self.retry.max_retries);
        env_parse("CLAWLOOP_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        env_parse("CLAWLOOP_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);

        // Memory
        env_parse("CLAWLOOP_MEMORY_ENABLED", &mut self.memory.enabled);
        env_parse(
            "CLAWLOOP_MEMORY_CONSOLIDATION_THRESHOLD",
            &mut self.memory.consolidation_threshold,
        );
        env_parse("CLAWLOOP_MEMORY_BATCH_SIZE", &mut self.memory.batch_size);

        // Session
        env_parse("CLAWLOOP_SESSION_WINDOW_TURNS", &mut self.session.window_turns);
        if let Some(v) = std::env::var("CLAWLOOP_SESSION_WINDOW_TOKENS")
            .ok()
            .and_then(|val| val.parse().ok())
        {
            self.session.window_tokens = Some(v);
        }
        if let Ok(val) = std::env::var("CLAWLOOP_SESSION_STORAGE_DIR") {
            self.session.storage_dir = Some(val);
        }
        env_parse("CLAWLOOP_SESSION_CACHE_TURNS", &mut self.session.cache_turns);
        env_parse(
            "CLAWLOOP_SESSION_MAX_CACHED_SESSIONS",
            &mut self.session.max_cached_sessions,
        );

        // Tools
        env_parse("CLAWLOOP_TOOLS_TIMEOUT_SECS", &mut self.tools.timeout_secs);
        env_parse("CLAWLOOP_TOOLS_WEB_MAX_BYTES", &mut self.tools.web_max_bytes);

        // Bus
        env_parse("CLAWLOOP_BUS_INBOUND_CAPACITY", &mut self.bus.inbound_capacity);
        env_parse(
            "CLAWLOOP_BUS_OUTBOUND_CAPACITY",
            &mut self.bus.outbound_capacity,
        );

        // Logging
        if let Ok(val) = std::env::var("CLAWLOOP_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.agent.max_tool_iterations == 0 {
            problems.push("agent.max_tool_iterations must be at least 1");
        }
        if self.agent.model_timeout_secs == 0 {
            problems.push("agent.model_timeout_secs must be at least 1");
        }
        if self.bus.inbound_capacity == 0 {
            problems.push("bus.inbound_capacity must be at least 1");
        }
        if self.bus.outbound_capacity == 0 {
            problems.push("bus.outbound_capacity must be at least 1");
        }
        if self.session.window_turns == 0 {
            problems.push("session.window_turns must be at least 1");
        }
        if self.session.window_tokens == Some(0) {
            problems.push("session.window_tokens must be at least 1 when set");
        }
        if self.session.cache_turns < self.session.window_turns {
            problems.push("session.cache_turns must be at least session.window_turns");
        }
        if self.session.max_cached_sessions == 0 {
            problems.push("session.max_cached_sessions must be at least 1");
        }
        if self.memory.enabled && self.memory.consolidation_threshold == 0 {
            problems.push("memory.consolidation_threshold must be at least 1");
        }
        if self.memory.batch_size == 0 {
            problems.push("memory.batch_size must be at least 1");
        }
        if self.tools.timeout_secs == 0 {
            problems.push("tools.timeout_secs must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            problems.push("agent.temperature must be between 0.0 and 2.0");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ClawError::Config(problems.join("; ")))
        }
    }

    /// Workspace directory with `~` expanded.
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.agent.workspace)
    }

    /// Directory for session logs.
    pub fn sessions_dir(&self) -> PathBuf {
        match &self.session.storage_dir {
            Some(dir) => expand_home(dir),
            None => Self::dir().join("sessions"),
        }
    }
}
