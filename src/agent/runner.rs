//! The agent control loop
//!
//! Drives a conversation from a user prompt to a final answer: call the
//! LLM, dispatch whatever tools it asks for, feed the results back, and
//! repeat until the model answers in plain text, the iteration budget runs
//! out, the loop guard fires twice, or a tool terminates the run.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::agent::client::LlmClient;
use crate::agent::loop_guard::{LoopGuard, LoopVerdict};
use crate::agent::memory::MessageStore;
use crate::agent::state::AgentState;
use crate::agent::types::{
    AssistantToolCall, FunctionCall, GenerationOptions, Message,
};
use crate::config::AgentConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::tools::{ToolCall, ToolInvoker, ToolRegistry, ToolStatus};

/// Advisory run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Act directly
    #[default]
    Action,
    /// Nudge the model to plan before acting
    Plan,
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "action" => Ok(RunMode::Action),
            "plan" => Ok(RunMode::Plan),
            other => Err(Error::Validation(format!("unknown mode '{}'", other))),
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Timeout,
}

/// A file-like output surfaced by a tool during the run
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub name: String,
    pub mime_type: String,
    pub content: String,
}

/// The result of one `run`
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Human-readable final response
    pub response: String,
    /// Terminal status
    pub status: RunStatus,
    /// Every tool call actually dispatched, in order
    pub tool_calls: Vec<ToolCall>,
    /// Artifacts collected from tool results
    pub artifacts: Vec<Artifact>,
}

/// The agent: a state machine plus its memory and tool handles
pub struct Agent {
    config: AgentConfig,
    llm: Arc<LlmClient>,
    registry: Arc<ToolRegistry>,
    invoker: ToolInvoker,
    memory: MessageStore,
    state: AgentState,
    iterations: u32,
}

impl Agent {
    /// Create an agent over the given LLM client and tool registry.
    pub fn new(config: AgentConfig, llm: Arc<LlmClient>, registry: Arc<ToolRegistry>) -> Self {
        let mut memory = MessageStore::new(config.memory_max_tokens);
        memory.set_system(Message::system(&config.system_prompt));
        Agent {
            invoker: ToolInvoker::new(registry.clone()),
            config,
            llm,
            registry,
            memory,
            state: AgentState::Idle,
            iterations: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Read access to conversation memory.
    pub fn memory(&self) -> &MessageStore {
        &self.memory
    }

    /// Cache statistics from the invocation layer.
    pub fn cache_stats(&self) -> crate::tools::CacheStats {
        self.invoker.cache_stats()
    }

    /// Run a prompt to completion. See [`run_cancellable`].
    ///
    /// [`run_cancellable`]: Agent::run_cancellable
    pub async fn run(&mut self, prompt: &str, mode: RunMode) -> Result<RunOutcome> {
        self.run_cancellable(prompt, mode, CancellationToken::new())
            .await
    }

    /// Run a prompt to completion, honoring an external cancellation token.
    ///
    /// Validation failures (empty prompt, zero iteration budget) return
    /// `Err` without entering the loop; everything that happens inside the
    /// loop is reported through the outcome's status.
    pub async fn run_cancellable(
        &mut self,
        prompt: &str,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".into()));
        }
        if self.config.max_iterations == 0 {
            return Err(Error::Validation("max_iterations must be at least 1".into()));
        }

        let started = Instant::now();
        self.iterations = 0;
        if self.state.is_terminal() {
            self.transition(AgentState::Idle);
        }
        let mut guard = LoopGuard::new();
        let mut dispatched: Vec<ToolCall> = Vec::new();
        let mut artifacts: Vec<Artifact> = Vec::new();

        self.transition(AgentState::Thinking);
        self.memory.append(Message::user(prompt))?;
        if mode == RunMode::Plan {
            self.memory.append(Message::system(
                "Before executing any tools, briefly plan your approach: what is \
                 being asked, what information or actions are needed, and in what \
                 order.",
            ))?;
        }

        let outcome = 'run: loop {
            // ---- THINKING: one LLM round-trip --------------------------
            if cancel.is_cancelled() {
                break 'run self.cancelled_outcome(&dispatched, &artifacts)?;
            }

            let reply = match self
                .llm
                .chat_with_tools(
                    self.memory.snapshot(),
                    self.registry.definitions(),
                    self.generation_options(),
                    &cancel,
                )
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("LLM call failed terminally: {}", e);
                    self.transition(AgentState::Error);
                    break 'run self.error_outcome(&e, &dispatched, &artifacts);
                }
            };

            // ---- Final text: no tool calls -----------------------------
            if reply.tool_calls.is_empty() {
                self.memory.append(Message::assistant(reply.content.clone()))?;
                self.transition(AgentState::Done);
                let response = if reply.content.is_empty() {
                    self.synthesize_response(prompt)
                } else {
                    reply.content
                };
                break 'run RunOutcome {
                    response,
                    status: RunStatus::Success,
                    tool_calls: dispatched,
                    artifacts,
                };
            }

            // ---- Tool calls: append assistant message, enter EXECUTING -
            let wire_calls: Vec<AssistantToolCall> =
                reply.tool_calls.iter().map(to_wire_call).collect();
            self.memory
                .append(Message::assistant_with_tools(reply.content.clone(), wire_calls))?;
            if !reply.content.is_empty() {
                guard.note_progress();
            }

            if self.count_iteration() {
                // Budget spent entering execution: drop the unprocessed
                // calls and answer from what was gathered so far.
                self.transition(AgentState::Done);
                break 'run RunOutcome {
                    response: self.synthesize_response(prompt),
                    status: RunStatus::Success,
                    tool_calls: dispatched,
                    artifacts,
                };
            }
            self.transition(AgentState::Executing);

            for call in &reply.tool_calls {
                if cancel.is_cancelled() {
                    break 'run self.cancelled_outcome(&dispatched, &artifacts)?;
                }

                info!(tool = %call.name, id = %call.id, "dispatching tool call");
                let result = self.invoker.dispatch(call, &cancel).await;
                dispatched.push(call.clone());
                collect_artifacts(&result.metadata, &mut artifacts);

                self.memory.append(
                    Message::tool(&call.id, result.to_prompt_string()).with_name(&call.name),
                )?;

                if result.status == ToolStatus::Terminate {
                    info!("terminate tool invoked, ending run");
                    self.transition(AgentState::Done);
                    break 'run RunOutcome {
                        response: result.content,
                        status: RunStatus::Success,
                        tool_calls: dispatched,
                        artifacts,
                    };
                }

                match guard.record(&call.name, &call.arguments) {
                    LoopVerdict::Clear => {}
                    LoopVerdict::Redirect(hint) => {
                        warn!(tool = %call.name, "loop detected, injecting redirect");
                        self.memory.append(Message::system(hint))?;
                    }
                    LoopVerdict::Abort => {
                        warn!(tool = %call.name, "second loop detection, aborting run");
                        self.transition(AgentState::Error);
                        let e = Error::Loop(call.name.clone());
                        break 'run self.error_outcome(&e, &dispatched, &artifacts);
                    }
                }

                if result.status == ToolStatus::Success {
                    guard.note_progress();
                }
            }

            if self.count_iteration() {
                self.transition(AgentState::Done);
                break 'run RunOutcome {
                    response: self.synthesize_response(prompt),
                    status: RunStatus::Success,
                    tool_calls: dispatched,
                    artifacts,
                };
            }
            self.transition(AgentState::Thinking);
        };

        info!(
            status = ?outcome.status,
            iterations = self.iterations,
            tool_calls = outcome.tool_calls.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(outcome)
    }

    /// Clear memory (keeping the system prompt), release stateful tools,
    /// and return to idle.
    pub async fn reset(&mut self) {
        self.memory.clear();
        self.iterations = 0;
        for (_, tool) in self.registry.list() {
            if tool.stateful() {
                tool.cleanup().await;
            }
            tool.reset().await;
        }
        self.state = AgentState::Idle;
    }

    /// Release every registered tool. Call before dropping the agent, on
    /// error paths included.
    pub async fn shutdown(&mut self) {
        self.registry.cleanup_all().await;
        self.state = AgentState::Idle;
    }

    fn generation_options(&self) -> GenerationOptions {
        GenerationOptions::default()
    }

    /// Count one transition into or out of executing; true when the budget
    /// is exhausted.
    fn count_iteration(&mut self) -> bool {
        self.iterations += 1;
        if self.iterations >= self.config.max_iterations {
            warn!(
                iterations = self.iterations,
                "iteration budget exhausted, synthesizing fallback response"
            );
            true
        } else {
            false
        }
    }

    fn transition(&mut self, next: AgentState) {
        trace!(from = %self.state, to = %next, "state transition");
        debug_assert!(
            self.state.can_transition(next) || self.state == next,
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Deterministic final response when the model never produced one:
    /// latest assistant text, else a digest of recent tool results, else a
    /// canned fallback naming the prompt.
    fn synthesize_response(&self, prompt: &str) -> String {
        if let Some(message) = self.memory.last_assistant() {
            if !message.content.is_empty() {
                return message.content.clone();
            }
        }

        let recent = self.memory.recent_tool_results(self.config.synthesis_results);
        if !recent.is_empty() {
            let mut out = String::from("Based on tool results:");
            // recent_tool_results is newest-first; present chronologically
            for message in recent.iter().rev() {
                let name = message.name.as_deref().unwrap_or("tool");
                out.push_str(&format!("\n[{}] {}", name, message.content));
            }
            return out;
        }

        format!(
            "I was unable to complete the request \"{}\". Please try rephrasing \
             it or breaking it into smaller steps.",
            prompt
        )
    }

    fn error_outcome(
        &self,
        error: &Error,
        dispatched: &[ToolCall],
        artifacts: &[Artifact],
    ) -> RunOutcome {
        let status = if error.kind() == ErrorKind::Timeout {
            RunStatus::Timeout
        } else {
            RunStatus::Error
        };
        RunOutcome {
            response: error.user_message(),
            status,
            tool_calls: dispatched.to_vec(),
            artifacts: artifacts.to_vec(),
        }
    }

    fn cancelled_outcome(
        &mut self,
        dispatched: &[ToolCall],
        artifacts: &[Artifact],
    ) -> Result<RunOutcome> {
        debug!("cancellation observed at loop boundary");
        self.memory
            .append(Message::system("The run was cancelled by the user."))?;
        self.transition(AgentState::Error);
        let e = Error::Cancelled("run cancelled".into());
        Ok(self.error_outcome(&e, dispatched, artifacts))
    }
}

fn to_wire_call(call: &ToolCall) -> AssistantToolCall {
    let arguments = match &call.arguments {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    AssistantToolCall {
        id: call.id.clone(),
        call_type: "function".to_string(),
        function: FunctionCall {
            name: call.name.clone(),
            arguments,
        },
    }
}

/// Pull `artifact` / `artifacts` entries out of tool-result metadata.
fn collect_artifacts(metadata: &Option<Value>, artifacts: &mut Vec<Artifact>) {
    let Some(metadata) = metadata else { return };

    let mut push = |value: &Value| {
        let Some(name) = value.get("name").and_then(|v| v.as_str()) else {
            return;
        };
        artifacts.push(Artifact {
            name: name.to_string(),
            mime_type: value
                .get("mime_type")
                .and_then(|v| v.as_str())
                .unwrap_or("text/plain")
                .to_string(),
            content: value
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    };

    if let Some(one) = metadata.get("artifact") {
        push(one);
    }
    if let Some(many) = metadata.get("artifacts").and_then(|v| v.as_array()) {
        for value in many {
            push(value);
        }
    }
}
