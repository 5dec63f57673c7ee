use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stepwise_core::config::{AppConfig, ModelConfig, UnknownToolPolicy};
use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::event::EventBus;
use stepwise_core::traits::ModelClient;
use stepwise_core::types::{ChatMessage, Role, ToolCall};
use stepwise_tools::{stringify_result, ToolRegistry};

use crate::graph::{GraphBuilder, Run, RunOptions, Step, StepGraph, ENTRY};
use crate::session::SessionMemory;

pub const PREPARE_MESSAGES: &str = "prepare_messages";
pub const MODEL: &str = "model";
pub const TOOL_EXECUTOR: &str = "tool_executor";
pub const END: &str = "end";

/// State threaded through the conversational loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Query for the current invocation.
    pub user_query: String,
    /// System instruction, used only when the conversation is empty.
    pub instructions: String,
    pub messages: Vec<ChatMessage>,
    /// Calls requested by the latest model turn and not yet executed.
    pub pending_tool_calls: Option<Vec<ToolCall>>,
    /// Tokens reported by the model during this run. Never decreases.
    pub total_tokens: u64,
    pub session_id: String,
}

impl AgentState {
    pub fn with_messages(self, messages: Vec<ChatMessage>) -> Self {
        Self { messages, ..self }
    }

    pub fn with_pending_tool_calls(self, pending_tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            pending_tool_calls,
            ..self
        }
    }

    pub fn with_total_tokens(self, total_tokens: u64) -> Self {
        Self {
            total_tokens,
            ..self
        }
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        self.pending_tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }

    /// Text of the last assistant turn, or the empty string.
    pub fn reply(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .unwrap_or("")
    }
}

// ── Steps ───────────────────────────────────────────────────────

/// Seeds the system turn on an empty conversation, then appends the query.
struct PrepareMessages;

impl Step<AgentState> for PrepareMessages {
    fn run(&self, state: AgentState) -> BoxFuture<'_, Result<AgentState>> {
        Box::pin(async move {
            let mut messages = state.messages.clone();
            if messages.is_empty() {
                messages.push(ChatMessage::system(state.instructions.clone()));
            }
            messages.push(ChatMessage::user(state.user_query.clone()));
            Ok(state.with_messages(messages))
        })
    }
}

/// Sends the conversation to the model and records its reply.
struct ModelStep {
    llm: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    model: ModelConfig,
}

impl Step<AgentState> for ModelStep {
    fn run(&self, state: AgentState) -> BoxFuture<'_, Result<AgentState>> {
        Box::pin(async move {
            let definitions = self.tools.definitions();
            let response = self
                .llm
                .complete(&self.model, state.messages.clone(), &definitions)
                .await?;

            let tool_calls = response.tool_calls.filter(|calls| !calls.is_empty());
            let used = response.usage.map(|u| u.total_tokens).unwrap_or(0);
            let total = state.total_tokens.saturating_add(used);
            debug!(
                session_id = %state.session_id,
                tool_calls = tool_calls.as_ref().map_or(0, Vec::len),
                tokens = used,
                "Model replied"
            );

            let mut messages = state.messages.clone();
            messages.push(ChatMessage::assistant(response.content, tool_calls.clone()));
            Ok(state
                .with_messages(messages)
                .with_pending_tool_calls(tool_calls)
                .with_total_tokens(total))
        })
    }
}

/// Runs every pending tool call and appends one tool turn per call.
struct ToolStep {
    tools: Arc<ToolRegistry>,
    policy: UnknownToolPolicy,
}

impl Step<AgentState> for ToolStep {
    fn run(&self, state: AgentState) -> BoxFuture<'_, Result<AgentState>> {
        Box::pin(async move {
            let calls = state.pending_tool_calls.clone().unwrap_or_default();
            let mut messages = state.messages.clone();

            for call in &calls {
                if self.tools.get(&call.name).is_none() {
                    match self.policy {
                        UnknownToolPolicy::Skip => {
                            warn!(tool = %call.name, call_id = %call.id, "Skipping call to unknown tool");
                        }
                        UnknownToolPolicy::ErrorTurn => {
                            warn!(tool = %call.name, call_id = %call.id, "Reporting unknown tool to model");
                            let text = format!("Error: unknown tool '{}'", call.name);
                            messages.push(ChatMessage::tool(
                                &call.id,
                                &call.name,
                                serde_json::to_string(&text)?,
                            ));
                        }
                    }
                    continue;
                }

                let input = parse_arguments(call)?;
                let start = Instant::now();
                let result = self.tools.execute(&call.name, input).await?;
                debug!(
                    tool = %call.name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Tool finished"
                );

                let text = stringify_result(&result);
                messages.push(ChatMessage::tool(
                    &call.id,
                    &call.name,
                    serde_json::to_string(&text)?,
                ));
            }

            Ok(state.with_messages(messages).with_pending_tool_calls(None))
        })
    }
}

/// Decode a call's JSON arguments. Blank arguments mean "no arguments".
fn parse_arguments(call: &ToolCall) -> Result<serde_json::Value> {
    if call.arguments.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(&call.arguments).map_err(|e| {
        StepwiseError::ToolValidation(format!(
            "arguments for '{}' are not valid JSON: {}",
            call.name, e
        ))
    })
}

/// Build the canonical tool loop:
/// entry -> prepare_messages -> model -> (tool_executor -> model)* -> end.
pub fn build_loop_graph(
    config: &AppConfig,
    llm: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    event_bus: Option<Arc<EventBus>>,
) -> Result<StepGraph<AgentState>> {
    let mut b = GraphBuilder::new();
    b.add_step(PREPARE_MESSAGES, PrepareMessages)?;
    b.add_step(
        MODEL,
        ModelStep {
            llm,
            tools: tools.clone(),
            model: config.model.clone(),
        },
    )?;
    b.add_step(
        TOOL_EXECUTOR,
        ToolStep {
            tools,
            policy: config.agent.unknown_tool_policy,
        },
    )?;
    b.add_termination(END)?;

    b.connect(ENTRY, PREPARE_MESSAGES)?;
    b.connect(PREPARE_MESSAGES, MODEL)?;
    b.connect_conditional(MODEL, &[TOOL_EXECUTOR, END], |state: &AgentState| {
        if state.has_pending_tool_calls() {
            TOOL_EXECUTOR
        } else {
            END
        }
    })?;
    b.connect(TOOL_EXECUTOR, MODEL)?;

    b.max_steps(config.engine.max_steps);
    if let Some(secs) = config.engine.max_duration_secs {
        b.deadline(Duration::from_secs(secs));
    }
    if let Some(bus) = event_bus {
        b.event_bus(bus);
    }
    b.build()
}

/// Conversational agent with per-session memory.
///
/// Each `invoke` runs the loop graph once. The conversation is seeded from
/// the final state of the session's previous run, and the completed run is
/// appended to the session.
pub struct Agent {
    config: AppConfig,
    graph: StepGraph<AgentState>,
    memory: SessionMemory<AgentState>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(
        config: AppConfig,
        llm: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        let graph = build_loop_graph(&config, llm, tools, Some(event_bus))?;
        Ok(Self {
            config,
            graph,
            memory: SessionMemory::new(),
            locks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn graph(&self) -> &StepGraph<AgentState> {
        &self.graph
    }

    pub fn memory(&self) -> &SessionMemory<AgentState> {
        &self.memory
    }

    /// Cancelling this token aborts every in-flight invocation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Session used when a caller does not name one.
    pub fn default_session(&self) -> &str {
        &self.config.agent.default_session
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Drop the session's lock entry once no other invocation holds it.
    fn release_session_lock(&self, session_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
    }

    /// Run the loop for `query` on `session_id` (or the default session).
    ///
    /// Invocations on the same session are serialized. A failed run leaves
    /// the session untouched.
    pub async fn invoke(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<Arc<Run<AgentState>>> {
        let session_id = session_id.unwrap_or(&self.config.agent.default_session);
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.invoke_locked(query, session_id).await
        };
        self.release_session_lock(session_id, lock);
        result
    }

    async fn invoke_locked(
        &self,
        query: &str,
        session_id: &str,
    ) -> Result<Arc<Run<AgentState>>> {
        self.memory.create_session(session_id);
        let previous = self
            .memory
            .last(session_id)
            .and_then(|run| run.final_state().map(|s| s.messages.clone()))
            .unwrap_or_default();

        info!(
            session_id = %session_id,
            history = previous.len(),
            "Invoking agent"
        );

        let initial = AgentState {
            user_query: query.to_string(),
            instructions: self.config.agent.instructions.clone(),
            messages: previous,
            pending_tool_calls: None,
            total_tokens: 0,
            session_id: session_id.to_string(),
        };
        let options = RunOptions::default()
            .with_cancel(self.cancel.child_token())
            .with_tag(session_id);

        let run = Arc::new(self.graph.run_with(initial, options).await?);
        self.memory.add(session_id, run.clone());
        Ok(run)
    }

    /// Every run of `session_id`, oldest first.
    pub fn session_runs(&self, session_id: &str) -> Vec<Arc<Run<AgentState>>> {
        self.memory.all(session_id)
    }

    pub fn last_run(&self, session_id: &str) -> Option<Arc<Run<AgentState>>> {
        self.memory.last(session_id)
    }

    /// Forget every run of `session_id`. The next invocation starts fresh.
    pub fn reset_session(&self, session_id: &str) {
        info!(session_id = %session_id, "Resetting session");
        self.memory.reset(session_id);
    }

    /// Known session ids, sorted.
    pub fn sessions(&self) -> Vec<String> {
        self.memory.list()
    }
}
