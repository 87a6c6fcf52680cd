//! Filesystem tools for ClawLoop
//!
//! `read_file`, `write_file` and `list_dir`. Paths may be relative to the
//! workspace or absolute, but must always resolve inside the workspace in
//! the tool context.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ClawError, Result};

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

/// Maximum characters of file content returned to the model.
const MAX_READ_CHARS: usize = 100_000;

/// Collapse `.` and `..` components without touching the filesystem.
///
/// Returns `None` when `..` would climb above the start of the path.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// Resolve `path` against the workspace and make sure it stays inside it.
///
/// Symlinks are followed for the part of the path that already exists, so a
/// link pointing outside the workspace is rejected as well.
pub(crate) fn resolve_in_workspace(path: &str, ctx: &ToolContext) -> Result<PathBuf> {
    let workspace = ctx.workspace.as_ref().ok_or_else(|| {
        ClawError::SecurityViolation(
            "Workspace not configured; filesystem tools require a workspace".to_string(),
        )
    })?;
    let root = workspace.canonicalize().map_err(|e| {
        ClawError::Tool(format!(
            "Workspace '{}' is not accessible: {}",
            workspace.display(),
            e
        ))
    })?;

    let requested = Path::new(path);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    let candidate = normalize_lexically(&joined).ok_or_else(|| escape_error(path))?;

    // Canonicalize the deepest existing ancestor and re-attach the rest
    let mut existing = candidate.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize().unwrap_or_else(|_| existing.to_path_buf());
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }

    if !resolved.starts_with(&root) {
        return Err(escape_error(path));
    }
    Ok(resolved)
}

fn escape_error(path: &str) -> ClawError {
    ClawError::SecurityViolation(format!("Path '{}' escapes the workspace", path))
}

/// Resource key shared by all filesystem tools, so that reads and writes of
/// the same path inside one batch are ordered.
fn fs_resource_key(args: &Value) -> Option<String> {
    let path = args.get("path").and_then(Value::as_str)?;
    let normalized = normalize_lexically(Path::new(path))?;
    Some(format!("fs:{}", normalized.display()))
}

fn path_arg(args: &Value) -> Result<&str> {
    args.get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| ClawError::Tool("Missing 'path' argument".into()))
}

/// Tool for reading a text file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                }
            },
            "required": ["path"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FilesystemRead
    }

    fn resource_key(&self, args: &Value) -> Option<String> {
        fs_resource_key(args)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = path_arg(&args)?;
        let full_path = resolve_in_workspace(path, ctx)?;

        let content = tokio::fs::read_to_string(&full_path).await.map_err(|e| {
            ClawError::Tool(format!("Failed to read file '{}': {}", path, e))
        })?;

        if content.chars().count() > MAX_READ_CHARS {
            let truncated: String = content.chars().take(MAX_READ_CHARS).collect();
            return Ok(ToolOutput::llm_only(format!(
                "{}\n\n[truncated at {} characters]",
                truncated, MAX_READ_CHARS
            )));
        }
        Ok(ToolOutput::llm_only(content))
    }
}

/// Tool for writing a file, creating parent directories as needed.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace, replacing it if it exists"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "The full new content of the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FilesystemWrite
    }

    fn resource_key(&self, args: &Value) -> Option<String> {
        fs_resource_key(args)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = path_arg(&args)?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ClawError::Tool("Missing 'content' argument".into()))?;

        let full_path = resolve_in_workspace(path, ctx)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ClawError::Tool(format!("Failed to create parent directories: {}", e))
            })?;
        }

        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| ClawError::Tool(format!("Failed to write file '{}': {}", path, e)))?;

        Ok(ToolOutput::llm_only(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path
        )))
    }
}

/// Tool for listing a directory. Directories get a trailing `/`.
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory in the workspace"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the workspace; use \".\" for the root"
                }
            },
            "required": ["path"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FilesystemRead
    }

    fn resource_key(&self, args: &Value) -> Option<String> {
        fs_resource_key(args)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = path_arg(&args)?;
        let full_path = resolve_in_workspace(path, ctx)?;

        let mut entries = tokio::fs::read_dir(&full_path).await.map_err(|e| {
            ClawError::Tool(format!("Failed to read directory '{}': {}", path, e))
        })?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ClawError::Tool(format!("Failed to read directory entry: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            items.push(if is_dir { format!("{}/", name) } else { name });
        }

        if items.is_empty() {
            return Ok(ToolOutput::llm_only("(empty directory)"));
        }
        items.sort();
        Ok(ToolOutput::llm_only(items.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ctx_for(dir: &Path) -> ToolContext {
        ToolContext::new().with_workspace(dir)
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "test content").unwrap();

        let out = ReadFileTool
            .execute(json!({"path": "notes.txt"}), &ctx_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.for_llm, "test content");
        assert!(!out.is_error);
    }

    #[tokio::test]
    async fn test_read_file_not_found() {
        let dir = tempdir().unwrap();
        let err = ReadFileTool
            .execute(json!({"path": "missing.txt"}), &ctx_for(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read file"));
    }

    #[tokio::test]
    async fn test_requires_workspace() {
        let err = ReadFileTool
            .execute(json!({"path": "a.txt"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Workspace not configured"));
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempdir().unwrap();
        let out = WriteFileTool
            .execute(
                json!({"path": "deep/nested/file.txt", "content": "hello"}),
                &ctx_for(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.for_llm.contains("Wrote 5 bytes"));
        assert_eq!(
            fs::read_to_string(dir.path().join("deep/nested/file.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn test_list_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::create_dir(dir.path().join("a_dir")).unwrap();

        let out = ListDirTool
            .execute(json!({"path": "."}), &ctx_for(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.for_llm, "a_dir/\nb.txt");
    }

    #[tokio::test]
    async fn test_path_traversal_blocked() {
        let dir = tempdir().unwrap();
        let ctx = ctx_for(dir.path());

        let err = ReadFileTool
            .execute(json!({"path": "../../etc/passwd"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::SecurityViolation(_)));

        let err = WriteFileTool
            .execute(json!({"path": "/etc/clawloop-test", "content": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::SecurityViolation(_)));
    }

    #[tokio::test]
    async fn test_absolute_path_inside_workspace_allowed() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("inside.txt"), "ok").unwrap();

        let out = ReadFileTool
            .execute(
                json!({"path": root.join("inside.txt").to_str().unwrap()}),
                &ctx_for(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out.for_llm, "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_blocked() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "nope").unwrap();
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = ReadFileTool
            .execute(json!({"path": "link/secret.txt"}), &ctx_for(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClawError::SecurityViolation(_)));
    }

    #[test]
    fn test_resource_keys() {
        assert_eq!(
            ReadFileTool.resource_key(&json!({"path": "./a/../b.txt"})),
            Some("fs:b.txt".to_string())
        );
        assert_eq!(
            WriteFileTool.resource_key(&json!({"path": "b.txt", "content": ""})),
            ReadFileTool.resource_key(&json!({"path": "b.txt"}))
        );
        assert_eq!(ReadFileTool.resource_key(&json!({})), None);
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/ws/a/./b/../c")),
            Some(PathBuf::from("/ws/a/c"))
        );
        assert_eq!(normalize_lexically(Path::new("a/../../b")), None);
    }
}
