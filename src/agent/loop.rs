//! Agent loop implementation
//!
//! One dispatcher task pulls ready session keys off the bus and hands each
//! key to its own worker. A worker drains its key's queue strictly in order,
//! so turns of one session never overlap while distinct sessions run in
//! parallel. Each turn walks the [`TurnState`] machine:
//!
//! ```text
//! Idle ─> BuildingContext ─> AwaitingModel ─┬─> Responding ─> Idle
//!                                ^          │
//!                                └─ ExecutingTools <┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{InboundMessage, MessageBus, OutboundKind, OutboundMessage};
use crate::config::Config;
use crate::error::{ClawError, Result};
use crate::memory::{ConsolidationTrigger, MemoryStore};
use crate::providers::{
    ChatOptions, LLMProvider, LLMResponse, RetryProvider, StreamEvent, ToolDefinition,
};
use crate::session::{Message, Role, SessionStore, ToolCall, Turn, WindowLimit};
use crate::skills::SkillTable;
use crate::tools::{ToolContext, ToolExecutor, ToolRegistry};

use super::context::{ContextBuilder, RuntimeContext};

/// Appended to the answer when a turn runs out of tool rounds.
pub const ITERATION_LIMIT_MARKER: &str = "[iteration limit reached]";

const HELP_TEXT: &str = "Available commands:\n\
/new - start a new conversation (the old one is summarized into memory)\n\
/help - show this message";

/// Where a session's current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    BuildingContext,
    AwaitingModel,
    ExecutingTools,
    Responding,
}

/// Drives conversations: bus in, model and tools in the middle, bus out.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use clawloop::agent::AgentLoop;
/// use clawloop::bus::MessageBus;
/// use clawloop::config::Config;
/// use clawloop::memory::MemoryStore;
/// use clawloop::providers::LLMProvider;
/// use clawloop::session::SessionStore;
/// use clawloop::tools::{builtin_registry, ToolExecutor};
///
/// # async fn run(provider: Arc<dyn LLMProvider>) -> clawloop::error::Result<()> {
/// let config = Config::load()?;
/// let bus = MessageBus::with_capacities(config.bus.inbound_capacity, config.bus.outbound_capacity);
/// let memory = Arc::new(MemoryStore::open(&config.workspace_path())?);
/// let sessions = Arc::new(SessionStore::from_config(&config)?);
/// let registry = builtin_registry(&config.tools, &bus, Arc::clone(&memory))?;
/// let tools = Arc::new(ToolExecutor::new(registry));
///
/// let agent = Arc::new(AgentLoop::new(config, bus, provider, sessions, memory, tools));
/// tokio::spawn(Arc::clone(&agent).start());
/// // ...
/// agent.stop();
/// # Ok(())
/// # }
/// ```
pub struct AgentLoop {
    config: Config,
    bus: MessageBus,
    /// Retry-wrapped model client
    provider: Arc<dyn LLMProvider>,
    sessions: Arc<SessionStore>,
    memory: Arc<MemoryStore>,
    tools: Arc<ToolExecutor>,
    skills: RwLock<Arc<SkillTable>>,
    context_builder: ContextBuilder,
    states: std::sync::Mutex<HashMap<String, TurnState>>,
    /// Cancellation handle of each session's in-flight turn
    turn_tokens: std::sync::Mutex<HashMap<String, CancellationToken>>,
    workers: Mutex<HashMap<String, JoinHandle<()>>>,
    root: CancellationToken,
    running: AtomicBool,
}

impl AgentLoop {
    /// Create an agent loop.
    ///
    /// `provider` is wrapped in a [`RetryProvider`] configured from
    /// `config.retry`, with `config.agent.model_timeout_secs` as the
    /// per-attempt timeout.
    pub fn new(
        config: Config,
        bus: MessageBus,
        provider: Arc<dyn LLMProvider>,
        sessions: Arc<SessionStore>,
        memory: Arc<MemoryStore>,
        tools: Arc<ToolExecutor>,
    ) -> Self {
        let provider: Arc<dyn LLMProvider> = Arc::new(
            RetryProvider::from_config(provider, &config.retry)
                .with_attempt_timeout(Duration::from_secs(config.agent.model_timeout_secs)),
        );
        let context_builder = ContextBuilder::new().with_bootstrap(&config.agent.system_prompt);
        Self {
            config,
            bus,
            provider,
            sessions,
            memory,
            tools,
            skills: RwLock::new(Arc::new(SkillTable::default())),
            context_builder,
            states: std::sync::Mutex::new(HashMap::new()),
            turn_tokens: std::sync::Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Use this skill table (builder pattern).
    pub fn with_skills(self, skills: SkillTable) -> Self {
        self.swap_skills(skills);
        self
    }

    /// Use a custom context builder (builder pattern).
    pub fn with_context_builder(mut self, builder: ContextBuilder) -> Self {
        self.context_builder = builder;
        self
    }

    /// Replace the skill table. Turns already running keep the old one.
    pub fn swap_skills(&self, skills: SkillTable) -> Arc<SkillTable> {
        let mut guard = self.skills.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, Arc::new(skills));
        info!(skills = guard.len(), "Skill table swapped");
        previous
    }

    pub fn skills(&self) -> Arc<SkillTable> {
        Arc::clone(&self.skills.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current turn state of a session; `Idle` for unknown keys.
    pub fn session_state(&self, key: &str) -> TurnState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&self, key: &str, state: TurnState) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if state == TurnState::Idle {
            states.remove(key);
        } else {
            states.insert(key.to_string(), state);
        }
        debug!(session_key = %key, state = ?state, "Turn state");
    }

    /// Run the dispatcher until [`stop`](Self::stop) is called or the bus closes.
    ///
    /// # Errors
    /// Returns an error if the loop is already running.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ClawError::Config("Agent loop already running".into()));
        }
        info!("Starting agent loop");

        loop {
            let key = tokio::select! {
                _ = self.root.cancelled() => break,
                key = self.bus.next_ready_key() => match key {
                    Some(key) => key,
                    None => {
                        info!("Inbound bus closed");
                        break;
                    }
                },
            };
            self.dispatch(key).await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Agent loop stopped");
        Ok(())
    }

    /// Signal the dispatcher and every in-flight turn to stop.
    pub fn stop(&self) {
        info!("Stopping agent loop");
        self.root.cancel();
    }

    /// Hand `key` to its worker, starting one if needed.
    async fn dispatch(self: &Arc<Self>, key: String) {
        let mut workers = self.workers.lock().await;

        if let Some(handle) = workers.get(&key) {
            if !handle.is_finished() {
                // The live worker will pick the message up; only a queued
                // `/new` needs attention now.
                if self.bus.contains_command(&key, "/new") {
                    self.cancel_turn(&key);
                }
                return;
            }
        }

        let worker = Arc::clone(self);
        let worker_key = key.clone();
        let handle = tokio::spawn(async move { worker.run_worker(worker_key).await });
        workers.insert(key, handle);
    }

    fn cancel_turn(&self, key: &str) {
        let tokens = self.turn_tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = tokens.get(key) {
            info!(session_key = %key, "Cancelling in-flight turn");
            token.cancel();
        }
    }

    /// Drain one session's queue in order, then retire.
    async fn run_worker(self: Arc<Self>, key: String) {
        debug!(session_key = %key, "Session worker started");
        loop {
            if self.root.is_cancelled() {
                break;
            }
            match self.bus.try_consume_inbound_for(&key) {
                Some(msg) => self.handle_isolated(msg).await,
                None => {
                    // Re-check under the map lock: the dispatcher only skips
                    // spawning while this entry exists.
                    let mut workers = self.workers.lock().await;
                    if self.bus.pending_for(&key) == 0 {
                        workers.remove(&key);
                        break;
                    }
                }
            }
        }
        if self.root.is_cancelled() {
            self.workers.lock().await.remove(&key);
        }
        debug!(session_key = %key, "Session worker exiting");
    }

    /// Handle one message on its own task so a panic only loses that message.
    async fn handle_isolated(self: &Arc<Self>, msg: InboundMessage) {
        let this = Arc::clone(self);
        let key = msg.session_key.clone();
        let channel = msg.channel.clone();
        let chat_id = msg.chat_id.clone();

        if let Err(e) = tokio::spawn(async move { this.handle_inbound(msg).await }).await {
            error!(session_key = %key, error = %e, "Turn task failed");
            self.set_state(&key, TurnState::Idle);
            self.turn_tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            let notice = OutboundMessage::new(
                &key,
                &channel,
                &chat_id,
                "Sorry, something went wrong while processing your message.",
            )
            .with_kind(OutboundKind::Error);
            self.publish(notice);
        }
    }

    /// Process an inbound message end to end, publishing whatever it produces.
    pub async fn handle_inbound(&self, msg: InboundMessage) {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!(
            "turn",
            request_id = %request_id,
            session_key = %msg.session_key,
            channel = %msg.channel,
        );

        async {
            match msg.command() {
                Some("/new") => return self.handle_new(&msg).await,
                Some("/help") => {
                    self.publish(
                        OutboundMessage::reply_to(&msg, HELP_TEXT).with_kind(OutboundKind::Notice),
                    );
                    return;
                }
                _ => {}
            }

            let start = std::time::Instant::now();
            match self.process_message(&msg).await {
                Ok(answer) => {
                    info!(
                        duration_ms = start.elapsed().as_millis() as u64,
                        response_len = answer.len(),
                        "Turn completed"
                    );
                    self.publish(OutboundMessage::reply_to(&msg, &answer));
                    self.record_history(&msg, &answer).await;
                }
                Err(ClawError::Cancelled) => {
                    info!("Turn cancelled");
                }
                Err(e) => {
                    error!(
                        duration_ms = start.elapsed().as_millis() as u64,
                        error = %e,
                        "Turn failed"
                    );
                    self.publish(
                        OutboundMessage::reply_to(&msg, &e.user_message())
                            .with_kind(OutboundKind::Error),
                    );
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run one turn and return the final answer.
    ///
    /// Everything the turn produces is recorded in the session before this
    /// returns. A corrupt session log is quarantined (the user is told) and
    /// the turn is retried on a fresh session. Failed turns leave a single
    /// `Error` turn behind; cancelled turns leave nothing beyond the user turn.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<String> {
        let key = msg.session_key.as_str();
        let token = self.root.child_token();
        self.turn_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), token.clone());

        let mut result = self.run_turn(msg, &token).await;

        let corrupt = match &result {
            Err(e @ ClawError::SessionCorrupt { .. }) => Some(e.user_message()),
            _ => None,
        };
        if let Some(notice) = corrupt {
            warn!(session_key = %key, "Session log unreadable, starting fresh");
            result = match self.sessions.quarantine(key).await {
                Ok(_) => {
                    self.publish(
                        OutboundMessage::reply_to(msg, &notice).with_kind(OutboundKind::Notice),
                    );
                    self.run_turn(msg, &token).await
                }
                Err(e) => Err(e),
            };
        }

        match &result {
            Err(ClawError::Cancelled) | Ok(_) => {}
            Err(e) => {
                if let Err(append_err) = self.sessions.append(key, Turn::error(&e.to_string())).await {
                    warn!(error = %append_err, "Failed to record error turn");
                }
            }
        }

        self.turn_tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.set_state(key, TurnState::Idle);
        result
    }

    async fn run_turn(&self, msg: &InboundMessage, token: &CancellationToken) -> Result<String> {
        let key = msg.session_key.as_str();
        let agent = &self.config.agent;

        // BuildingContext
        self.set_state(key, TurnState::BuildingContext);
        self.sessions
            .append(
                key,
                Turn::user(&msg.content).with_attachments(msg.attachments.clone()),
            )
            .await?;
        let prior_turns = self.sessions.turn_count(key).await?;
        let window = self.sessions.recent_window(key, self.window_limit()).await?;

        let digest = if self.config.memory.enabled {
            self.memory.render_digest().await.unwrap_or_else(|e| {
                warn!(error = %e, "Long-term memory unavailable for this turn");
                String::new()
            })
        } else {
            String::new()
        };

        let registry = self.tools.snapshot();
        let workspace = self.config.workspace_path();
        let runtime = RuntimeContext::new()
            .with_current_time()
            .with_channel(&msg.channel)
            .with_tools(registry.names().into_iter().map(str::to_string).collect())
            .with_workspace(&workspace.to_string_lossy())
            .with_os_info();
        let system_prompt = self.context_builder.build_system_prompt(
            key,
            prior_turns,
            &digest,
            &self.skills(),
            &runtime,
        );
        let mut messages = self.context_builder.build_messages(&system_prompt, &window);
        let definitions = registry.definitions();

        let tool_ctx = ToolContext::new()
            .with_session(key)
            .with_channel(&msg.channel, &msg.chat_id)
            .with_workspace(&workspace)
            .with_cancel(token.clone());

        let mut pending: Vec<Turn> = Vec::new();
        let mut rounds = 0u32;

        let answer = loop {
            self.set_state(key, TurnState::AwaitingModel);
            let response = self
                .call_model(msg, messages.clone(), definitions.clone(), token)
                .await?;

            if !response.has_tool_calls() {
                break response.content;
            }

            if rounds >= agent.max_tool_iterations {
                let limit = ClawError::IterationLimitExceeded(agent.max_tool_iterations);
                warn!(error = %limit, "Returning partial answer");
                break with_limit_marker(&response.content);
            }
            rounds += 1;

            self.set_state(key, TurnState::ExecutingTools);
            let calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|tc| tc.to_tool_call())
                .collect();
            debug!(round = rounds, calls = calls.len(), "Executing tool round");

            let results = self
                .run_tools(&registry, &calls, &tool_ctx, token)
                .await?;

            self.context_builder
                .add_assistant_message(&mut messages, &response.content, calls.clone());
            pending.push(Turn::assistant_with_tools(&response.content, calls.clone()));
            for (call, result) in calls.iter().zip(results) {
                self.context_builder.add_tool_result(
                    &mut messages,
                    &call.id,
                    &call.name,
                    &result.content,
                );
                pending.push(Turn::tool_result(
                    &result.tool_call_id,
                    &result.content,
                    result.is_error,
                ));
            }
        };

        if token.is_cancelled() {
            return Err(ClawError::Cancelled);
        }

        // Responding
        self.set_state(key, TurnState::Responding);
        pending.push(Turn::assistant(&answer));
        self.sessions.append_many(key, pending).await?;
        Ok(answer)
    }

    async fn run_tools(
        &self,
        registry: &ToolRegistry,
        calls: &[ToolCall],
        ctx: &ToolContext,
        token: &CancellationToken,
    ) -> Result<Vec<crate::tools::ToolResult>> {
        let results = tokio::select! {
            _ = token.cancelled() => return Err(ClawError::Cancelled),
            results = self.tools.execute_batch_on(registry, calls, ctx) => results,
        };
        if token.is_cancelled() {
            return Err(ClawError::Cancelled);
        }
        Ok(results)
    }

    /// Ask the model for the next step, streaming chunks out if enabled.
    async fn call_model(
        &self,
        msg: &InboundMessage,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        token: &CancellationToken,
    ) -> Result<LLMResponse> {
        let agent = &self.config.agent;
        let model = (!agent.model.is_empty()).then_some(agent.model.as_str());
        let options = ChatOptions::new()
            .with_max_tokens(agent.max_tokens)
            .with_temperature(agent.temperature);

        if !agent.streaming {
            return tokio::select! {
                _ = token.cancelled() => Err(ClawError::Cancelled),
                response = self.provider.chat(messages, tools, model, options) => response,
            };
        }

        let mut rx = tokio::select! {
            _ = token.cancelled() => return Err(ClawError::Cancelled),
            rx = self.provider.chat_stream(messages, tools, model, options) => rx?,
        };

        let mut response = LLMResponse::text("");
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return Err(ClawError::Cancelled),
                event = rx.recv() => event,
            };
            match event {
                Some(StreamEvent::Delta(delta)) => {
                    response.content.push_str(&delta);
                    self.publish(
                        OutboundMessage::reply_to(msg, &delta).with_kind(OutboundKind::Chunk),
                    );
                }
                Some(StreamEvent::ToolCalls(calls)) => response.tool_calls.extend(calls),
                Some(StreamEvent::Done { usage }) => {
                    response.usage = usage;
                    break;
                }
                Some(StreamEvent::Error(e)) => return Err(e.into()),
                None => break,
            }
        }
        Ok(response)
    }

    /// `/new`: summarize what is left, then start the session over.
    async fn handle_new(&self, msg: &InboundMessage) {
        let key = msg.session_key.as_str();
        self.cancel_turn(key);

        if self.config.memory.enabled && self.memory.unarchived_count().await > 0 {
            self.spawn_consolidation(ConsolidationTrigger::SessionReset);
        }

        let reply = match self.sessions.clear(key).await {
            Ok(()) => {
                info!("Session cleared");
                "Started a new conversation.".to_string()
            }
            Err(e) => {
                error!(error = %e, "Failed to clear session");
                e.user_message()
            }
        };
        self.publish(OutboundMessage::reply_to(msg, &reply).with_kind(OutboundKind::Notice));
    }

    /// Log the exchange to history and consolidate once this session has piled up enough.
    async fn record_history(&self, msg: &InboundMessage, answer: &str) {
        if !self.config.memory.enabled {
            return;
        }
        for (role, text) in [(Role::User, msg.content.as_str()), (Role::Assistant, answer)] {
            if let Err(e) = self.memory.append_history(&msg.session_key, role, text).await {
                warn!(error = %e, "Failed to append history");
                return;
            }
        }

        let pending = self.memory.unarchived_count_for(&msg.session_key).await;
        if pending >= self.config.memory.consolidation_threshold {
            self.spawn_consolidation(ConsolidationTrigger::Threshold);
        }
    }

    /// Start a background consolidation unless one is already running.
    fn spawn_consolidation(&self, trigger: ConsolidationTrigger) {
        let Some(guard) = self.memory.try_begin_consolidation() else {
            debug!(trigger = %trigger, "Consolidation already in flight");
            return;
        };

        let memory = Arc::clone(&self.memory);
        let provider = Arc::clone(&self.provider);
        let model = Some(self.config.agent.model.clone()).filter(|m| !m.is_empty());
        tokio::spawn(
            async move {
                let _guard = guard;
                match memory
                    .consolidate(trigger, provider.as_ref(), model.as_deref())
                    .await
                {
                    Ok(record) => info!(facts = record.facts.len(), "Consolidation finished"),
                    Err(e) => warn!(error = %e, "Consolidation failed; will retry on next trigger"),
                }
            }
            .instrument(info_span!("consolidation", trigger = %trigger)),
        );
    }

    fn window_limit(&self) -> WindowLimit {
        match self.config.session.window_tokens {
            Some(tokens) => WindowLimit::Tokens(tokens),
            None => WindowLimit::Turns(self.config.session.window_turns),
        }
    }

    fn publish(&self, msg: OutboundMessage) {
        if let Err(e) = self.bus.publish_outbound(msg) {
            error!(error = %e, "Failed to publish outbound message");
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn tools(&self) -> &Arc<ToolExecutor> {
        &self.tools
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn with_limit_marker(partial: &str) -> String {
    let partial = partial.trim();
    if partial.is_empty() {
        ITERATION_LIMIT_MARKER.to_string()
    } else {
        format!("{}\n\n{}", partial, ITERATION_LIMIT_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::LLMToolCall;
    use crate::tools::EchoTool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Replays canned responses; an empty script answers "done".
    struct ScriptedProvider {
        script: std::sync::Mutex<VecDeque<Result<LLMResponse>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<LLMResponse>>) -> Self {
            Self {
                script: std::sync::Mutex::new(script.into()),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LLMResponse::text("done")))
        }

        fn default_model(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Fixture {
        _dir: TempDir,
        agent: AgentLoop,
    }

    fn fixture(provider: Arc<dyn LLMProvider>, tweak: impl FnOnce(&mut Config)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.agent.workspace = dir.path().display().to_string();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        tweak(&mut config);

        let memory = Arc::new(MemoryStore::open(dir.path()).unwrap());
        let sessions = Arc::new(SessionStore::new_memory());
        let tools = Arc::new(ToolExecutor::new(
            ToolRegistry::new().with_tool(Arc::new(EchoTool)),
        ));
        let agent = AgentLoop::new(config, MessageBus::new(), provider, sessions, memory, tools);
        Fixture { _dir: dir, agent }
    }

    fn echo_call(id: &str) -> LLMToolCall {
        LLMToolCall::new(id, "echo", r#"{"message":"ping"}"#)
    }

    #[tokio::test]
    async fn test_plain_answer_is_recorded() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(LLMResponse::text("4"))]));
        let f = fixture(provider, |_| {});
        let msg = InboundMessage::new("cli", "u", "c1", "2+2?");

        let answer = f.agent.process_message(&msg).await.unwrap();
        assert_eq!(answer, "4");
        let turns = f.agent.sessions().get_or_create("cli:c1").await.unwrap().turns;
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(f.agent.session_state("cli:c1"), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LLMResponse::with_tools("", vec![echo_call("c1")])),
            Ok(LLMResponse::text("echoed")),
        ]));
        let f = fixture(provider, |_| {});
        let msg = InboundMessage::new("cli", "u", "c1", "echo ping");

        assert_eq!(f.agent.process_message(&msg).await.unwrap(), "echoed");
        let turns = f.agent.sessions().get_or_create("cli:c1").await.unwrap().turns;
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(turns[2].content, "ping");
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_iteration_limit_appends_marker() {
        let script = (0..10)
            .map(|i| Ok(LLMResponse::with_tools("working", vec![echo_call(&format!("c{}", i))])))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(script));
        let f = fixture(provider.clone(), |c| c.agent.max_tool_iterations = 3);
        let msg = InboundMessage::new("cli", "u", "c1", "loop");

        let answer = f.agent.process_message(&msg).await.unwrap();
        assert_eq!(answer, format!("working\n\n{}", ITERATION_LIMIT_MARKER));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_provider_failure_records_error_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::InvalidRequest("bad".into()).into(),
        )]));
        let f = fixture(provider, |_| {});
        let msg = InboundMessage::new("cli", "u", "c1", "hi");

        assert!(f.agent.process_message(&msg).await.is_err());
        let turns = f.agent.sessions().get_or_create("cli:c1").await.unwrap().turns;
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Error]);
    }

    #[tokio::test]
    async fn test_help_and_new_commands() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(LLMResponse::text("hi"))]));
        let f = fixture(provider, |_| {});
        f.agent
            .handle_inbound(InboundMessage::new("cli", "u", "c1", "hello"))
            .await;
        assert_eq!(f.agent.bus().consume_outbound().await.unwrap().content, "hi");

        f.agent
            .handle_inbound(InboundMessage::new("cli", "u", "c1", "/help"))
            .await;
        let help = f.agent.bus().consume_outbound().await.unwrap();
        assert_eq!(help.kind, OutboundKind::Notice);
        assert!(help.content.contains("/new"));

        f.agent
            .handle_inbound(InboundMessage::new("cli", "u", "c1", "/new"))
            .await;
        let notice = f.agent.bus().consume_outbound().await.unwrap();
        assert_eq!(notice.kind, OutboundKind::Notice);
        assert_eq!(f.agent.sessions().turn_count("cli:c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_streaming_publishes_chunks() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(LLMResponse::text("streamed"))]));
        let f = fixture(provider, |c| c.agent.streaming = true);
        f.agent
            .handle_inbound(InboundMessage::new("cli", "u", "c1", "hi"))
            .await;

        let chunk = f.agent.bus().consume_outbound().await.unwrap();
        assert_eq!(chunk.kind, OutboundKind::Chunk);
        assert_eq!(chunk.content, "streamed");
        let last = f.agent.bus().consume_outbound().await.unwrap();
        assert_eq!(last.kind, OutboundKind::Final);
        assert_eq!(last.content, "streamed");
    }

    #[tokio::test]
    async fn test_swap_skills() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let f = fixture(provider, |_| {});
        assert!(f.agent.skills().is_empty());
        let old = f.agent.swap_skills(SkillTable::new(vec![
            crate::skills::SkillManifest::new("notes", "Keep notes", "body"),
        ]));
        assert!(old.is_empty());
        assert_eq!(f.agent.skills().len(), 1);
    }

    #[test]
    fn test_limit_marker_formatting() {
        assert_eq!(with_limit_marker("  "), ITERATION_LIMIT_MARKER);
        assert_eq!(
            with_limit_marker("half"),
            format!("half\n\n{}", ITERATION_LIMIT_MARKER)
        );
    }
}
