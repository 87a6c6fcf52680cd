//! Tools module - capabilities the model can call
//!
//! - [`Tool`]: the interface every capability implements
//! - [`ToolRegistry`]: name → tool table
//! - [`ToolExecutor`]: validated, time-bounded, cancellable execution
//!   against a swappable registry
//!
//! # Built-in Tools
//!
//! - `echo`: returns its input (testing)
//! - `read_file`, `write_file`, `list_dir`: workspace-confined file access
//! - `shell`: blocklisted shell commands in the workspace
//! - `web_fetch`: HTTP(S) GET
//! - `message`: proactive outbound messages
//! - `memory_search`: history lookup
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use clawloop::session::ToolCall;
//! use clawloop::tools::{EchoTool, ToolContext, ToolExecutor, ToolRegistry};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let executor = ToolExecutor::new(ToolRegistry::new().with_tool(Arc::new(EchoTool)));
//!
//! let call = ToolCall::new("call_1", "echo", json!({"message": "Hello!"}));
//! let result = executor.execute(&call, &ToolContext::new()).await;
//! assert_eq!(result.content, "Hello!");
//! assert!(!result.is_error);
//! # });
//! ```

pub mod filesystem;
pub mod memory_search;
pub mod message;
mod registry;
pub mod schema;
pub mod shell;
mod types;
pub mod web;

pub use registry::{ToolExecutor, ToolRegistry, DEFAULT_TOOL_TIMEOUT};
pub use types::{Tool, ToolCategory, ToolContext, ToolOutput, ToolResult};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::MessageBus;
use crate::config::ToolsConfig;
use crate::error::{ClawError, Result};
use crate::memory::MemoryStore;

/// A simple echo tool for testing purposes.
///
/// # Example
///
/// ```rust
/// use clawloop::tools::{EchoTool, Tool, ToolContext};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let result = EchoTool.execute(json!({"message": "Hello"}), &ToolContext::new()).await;
/// assert_eq!(result.unwrap().for_llm, "Hello");
/// # });
/// ```
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided message"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo back"
                }
            },
            "required": ["message"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Utility
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ClawError::Tool("Missing 'message' argument".into()))?;
        Ok(ToolOutput::llm_only(message))
    }
}

/// Build a registry with every built-in tool not disabled in `config`.
pub fn builtin_registry(
    config: &ToolsConfig,
    bus: &MessageBus,
    memory: Arc<MemoryStore>,
) -> Result<ToolRegistry> {
    let shell = shell::ShellTool::new()
        .with_blocklist(&config.shell_blocklist)?
        .with_timeout(Duration::from_secs(config.shell_timeout_secs));

    let candidates: Vec<Arc<dyn Tool>> = vec![
        Arc::new(filesystem::ReadFileTool),
        Arc::new(filesystem::WriteFileTool),
        Arc::new(filesystem::ListDirTool),
        Arc::new(shell),
        Arc::new(web::WebFetchTool::new().with_max_bytes(config.web_max_bytes)),
        Arc::new(message::MessageTool::new(bus.clone())),
        Arc::new(memory_search::MemorySearchTool::new(memory)),
    ];

    let mut registry = ToolRegistry::new();
    for tool in candidates {
        if config.disabled.iter().any(|name| name == tool.name()) {
            continue;
        }
        registry.register(tool);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_echo_tool() {
        let out = EchoTool
            .execute(json!({"message": "Hello"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(out.for_llm, "Hello");

        let err = EchoTool
            .execute(json!({}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing 'message'"));
    }

    #[test]
    fn test_builtin_registry_respects_disabled() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryStore::open(dir.path()).unwrap());
        let config = ToolsConfig {
            disabled: vec!["shell".to_string(), "web_fetch".to_string()],
            ..ToolsConfig::default()
        };

        let registry = builtin_registry(&config, &MessageBus::new(), memory).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "list_dir",
                "memory_search",
                "message",
                "read_file",
                "write_file"
            ]
        );
    }

    #[test]
    fn test_builtin_registry_rejects_bad_blocklist() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryStore::open(dir.path()).unwrap());
        let config = ToolsConfig {
            shell_blocklist: vec!["[".to_string()],
            ..ToolsConfig::default()
        };
        assert!(matches!(
            builtin_registry(&config, &MessageBus::new(), memory),
            Err(ClawError::Config(_))
        ));
    }
}
