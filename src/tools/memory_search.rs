//! `memory_search`: plain-text lookup over the conversation history.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ClawError, Result};
use crate::memory::MemoryStore;

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

const DEFAULT_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 50;

/// Searches the calling session's entries in `HISTORY.jsonl`, newest first.
///
/// Other sessions' history is never visible; a call without a session is
/// rejected.
pub struct MemorySearchTool {
    memory: Arc<MemoryStore>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search this conversation's past history for a word or phrase (case-insensitive)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to look for",
                    "minLength": 1
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches (default 10)",
                    "minimum": 1,
                    "maximum": MAX_LIMIT
                }
            },
            "required": ["query"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let session_key = ctx
            .session_key
            .as_deref()
            .ok_or_else(|| ClawError::Tool("memory_search needs a session".into()))?;
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ClawError::Tool("Missing 'query' argument".into()))?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT) as usize;

        let hits = self.memory.search_history(query, Some(session_key), limit).await?;
        if hits.is_empty() {
            return Ok(ToolOutput::llm_only(format!(
                "No history entries match '{}'",
                query
            )));
        }

        let lines: Vec<String> = hits
            .iter()
            .map(|e| {
                format!(
                    "[{}] {} ({}): {}",
                    e.timestamp.format("%Y-%m-%d %H:%M"),
                    e.role,
                    e.session_key,
                    e.text
                )
            })
            .collect();
        Ok(ToolOutput::llm_only(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_search_formats_hits() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryStore::open(dir.path()).unwrap());
        memory
            .append_history("cli:1", Role::User, "My cat is called Miso")
            .await
            .unwrap();
        memory
            .append_history("cli:1", Role::Assistant, "Lovely name")
            .await
            .unwrap();

        let tool = MemorySearchTool::new(Arc::clone(&memory));
        let ctx = ToolContext::new().with_session("cli:1");
        let out = tool
            .execute(json!({"query": "miso"}), &ctx)
            .await
            .unwrap();
        assert!(out.for_llm.contains("user (cli:1): My cat is called Miso"));
        assert!(!out.for_llm.contains("Lovely"));

        let none = tool.execute(json!({"query": "dog"}), &ctx).await.unwrap();
        assert!(none.for_llm.starts_with("No history entries"));
    }

    #[tokio::test]
    async fn test_memory_search_cannot_see_other_sessions() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryStore::open(dir.path()).unwrap());
        memory
            .append_history("test:alice", Role::User, "my bank pin is 4321 banana")
            .await
            .unwrap();

        let tool = MemorySearchTool::new(memory);
        let out = tool
            .execute(
                json!({"query": "banana"}),
                &ToolContext::new().with_session("test:bob"),
            )
            .await
            .unwrap();
        assert!(out.for_llm.starts_with("No history entries"));
        assert!(!out.for_llm.contains("4321"));

        let err = tool
            .execute(json!({"query": "banana"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("needs a session"));
    }
}
