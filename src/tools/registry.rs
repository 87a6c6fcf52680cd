//! Tool registry and executor for ClawLoop
//!
//! [`ToolRegistry`] is a plain name → tool table. [`ToolExecutor`] shares one
//! behind an `Arc` so every turn works against a stable snapshot while the
//! table can be swapped or extended underneath.
//!
//! Every call routed through the executor produces a [`ToolResult`]: unknown
//! tools, invalid arguments, timeouts, cancellation, tool errors and panics
//! all become error results the model can read.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{debug, error, info, warn};

use crate::error::ClawError;
use crate::providers::ToolDefinition;
use crate::session::ToolCall;

use super::schema::validate_args;
use super::{Tool, ToolContext, ToolResult};

/// Default per-call timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// A table of tools keyed by name.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use clawloop::tools::{EchoTool, ToolRegistry};
///
/// let mut registry = ToolRegistry::new();
/// registry.register(Arc::new(EchoTool));
///
/// assert!(registry.has("echo"));
/// assert_eq!(registry.definitions()[0].name, "echo");
/// ```
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, category = %tool.category(), "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check whether a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect()
    }
}

/// Runs tool calls against a swappable registry.
pub struct ToolExecutor {
    table: RwLock<Arc<ToolRegistry>>,
    default_timeout: Duration,
    /// One lock per resource key, shared by every batch this executor runs
    resource_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.snapshot())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolExecutor {
    /// Create an executor over `registry` with the default timeout.
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            table: RwLock::new(Arc::new(registry)),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            resource_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The registry as of now. Stays valid even if the table is swapped later.
    pub fn snapshot(&self) -> Arc<ToolRegistry> {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the whole registry, returning the previous one.
    pub fn swap(&self, registry: ToolRegistry) -> Arc<ToolRegistry> {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        let previous = std::mem::replace(&mut *guard, Arc::new(registry));
        info!(tools = guard.len(), "Tool registry swapped");
        previous
    }

    /// Add a tool without disturbing snapshots already handed out.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        let mut next = ToolRegistry::clone(&guard);
        next.register(tool);
        *guard = Arc::new(next);
    }

    /// Tool definitions of the current registry.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.snapshot().definitions()
    }

    /// Execute a single call against the current registry.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let registry = self.snapshot();
        self.execute_on(&registry, call, ctx).await
    }

    /// Execute a single call against a given registry snapshot.
    pub async fn execute_on(
        &self,
        registry: &ToolRegistry,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> ToolResult {
        let Some(tool) = registry.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return ToolResult::error(&call.id, format!("Tool not found: {}", call.name));
        };

        let violations = validate_args(&call.arguments, &tool.parameters());
        if !violations.is_empty() {
            warn!(tool = %call.name, violations = ?violations, "Rejected tool arguments");
            return ToolResult::error(
                &call.id,
                format!(
                    "Invalid arguments for '{}': {}",
                    call.name,
                    violations.join("; ")
                ),
            );
        }

        if ctx.cancel.is_cancelled() {
            return ToolResult::error(&call.id, ClawError::Cancelled.to_string());
        }

        let start = Instant::now();
        let task_ctx = ctx.clone();
        let args = call.arguments.clone();
        let task_tool = Arc::clone(&tool);
        let mut handle = tokio::spawn(async move { task_tool.execute(args, &task_ctx).await });

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                handle.abort();
                Err(ClawError::Cancelled)
            }
            joined = tokio::time::timeout(self.default_timeout, &mut handle) => match joined {
                Ok(Ok(Ok(output))) => Ok(output),
                Ok(Ok(Err(e))) => Err(ClawError::ToolExecution {
                    tool: call.name.clone(),
                    message: e.to_string(),
                }),
                Ok(Err(join_err)) if join_err.is_panic() => Err(ClawError::ToolExecution {
                    tool: call.name.clone(),
                    message: "the tool panicked".to_string(),
                }),
                Ok(Err(_)) => Err(ClawError::Cancelled),
                Err(_) => {
                    handle.abort();
                    Err(ClawError::ToolExecution {
                        tool: call.name.clone(),
                        message: format!(
                            "timed out after {}s",
                            self.default_timeout.as_secs_f32()
                        ),
                    })
                }
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                info!(
                    tool = %call.name,
                    duration_ms,
                    is_error = output.is_error,
                    "Tool executed successfully"
                );
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: output.for_llm,
                    is_error: output.is_error,
                }
            }
            Err(e) => {
                error!(
                    tool = %call.name,
                    error = %e,
                    duration_ms,
                    "Tool execution failed"
                );
                ToolResult::error(&call.id, format!("Error: {}", e))
            }
        }
    }

    /// Execute a batch of calls concurrently and return results in call order.
    ///
    /// Calls reporting the same [`Tool::resource_key`] run one after another
    /// in listed order while holding that key's lock; everything else runs
    /// in parallel.
    pub async fn execute_batch(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        let registry = self.snapshot();
        self.execute_batch_on(&registry, calls, ctx).await
    }

    /// [`execute_batch`](Self::execute_batch) against a given registry snapshot.
    pub async fn execute_batch_on(
        &self,
        registry: &ToolRegistry,
        calls: &[ToolCall],
        ctx: &ToolContext,
    ) -> Vec<ToolResult> {
        let mut keyed: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut free = Vec::new();
        for (idx, call) in calls.iter().enumerate() {
            match registry
                .get(&call.name)
                .and_then(|tool| tool.resource_key(&call.arguments))
            {
                Some(key) => keyed.entry(key).or_default().push(idx),
                None => free.push(idx),
            }
        }

        debug!(
            calls = calls.len(),
            serialized_groups = keyed.len(),
            "Executing tool batch"
        );

        let mut tasks: Vec<BoxFuture<'_, Vec<(usize, ToolResult)>>> = Vec::new();
        for idx in free {
            tasks.push(
                async move { vec![(idx, self.execute_on(registry, &calls[idx], ctx).await)] }
                    .boxed(),
            );
        }
        for (key, indices) in keyed {
            let lock = self.resource_lock(&key);
            tasks.push(
                async move {
                    let _held = lock.lock().await;
                    let mut results = Vec::with_capacity(indices.len());
                    for idx in indices {
                        results.push((idx, self.execute_on(registry, &calls[idx], ctx).await));
                    }
                    results
                }
                .boxed(),
            );
        }

        let mut ordered: Vec<Option<ToolResult>> = vec![None; calls.len()];
        for (idx, result) in join_all(tasks).await.into_iter().flatten() {
            ordered[idx] = Some(result);
        }
        ordered
            .into_iter()
            .zip(calls)
            .map(|(result, call)| {
                result.unwrap_or_else(|| ToolResult::error(&call.id, "Error: tool did not run"))
            })
            .collect()
    }

    fn resource_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.resource_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Forget locks nobody is holding or waiting on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}
