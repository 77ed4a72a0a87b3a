//! Tool-calling orchestration loop
//!
//! Drives one user query to completion:
//!
//! ```text
//! AwaitingModel --FinalAnswer--> Final --> Terminated
//!       ^    \
//!       |     --ToolCall--> Dispatching
//!       |                       |
//!       +-----------------------+
//! ```
//!
//! Tool failures (unknown tool, handler error, timeout) are written into the
//! transcript and the model gets another turn. Protocol and infrastructure
//! failures end the run and leave the partial transcript in place.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationState, Message};
use crate::error::{Error, Result, ToolError};
use crate::provider::{ModelClient, ModelTurn};
use crate::tools::{ToolDefinition, ToolInvocationRequest, ToolRegistry};

/// Default number of consecutive tool-call rounds per query
pub const DEFAULT_MAX_ROUNDS: usize = 8;

/// Limits applied to every run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Tool-call rounds allowed before the run fails with `MaxRoundsExceeded`
    pub max_rounds: usize,
    /// Upper bound on a single `ModelClient::generate` call
    pub model_timeout: Duration,
    /// Upper bound on a single tool invocation
    pub tool_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    AwaitingModel,
    Dispatching,
    Final,
    Terminated,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingModel => "awaiting_model",
            Self::Dispatching => "dispatching",
            Self::Final => "final",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Per-run bookkeeping
struct Run {
    state: OrchestratorState,
    rounds: usize,
}

impl Run {
    fn new() -> Self {
        Self {
            state: OrchestratorState::AwaitingModel,
            rounds: 0,
        }
    }

    fn transition(&mut self, next: OrchestratorState) {
        debug!(from = %self.state, to = %next, round = self.rounds, "Orchestrator transition");
        self.state = next;
    }
}

/// Runs queries against a model and a tool registry
///
/// Holds no per-conversation state, so one orchestrator can serve any number
/// of conversations concurrently; each run borrows its own transcript.
pub struct ToolCallOrchestrator {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

impl ToolCallOrchestrator {
    pub fn new(model: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            model,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Answer `query`, appending every generated message to `conversation`
    pub async fn run(&self, conversation: &mut ConversationState, query: &str) -> Result<String> {
        self.run_with_cancel(conversation, query, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), abandoning the run once `cancel` fires.
    ///
    /// A tool that is already executing is allowed to finish (or time out);
    /// its result is recorded before the run stops.
    pub async fn run_with_cancel(
        &self,
        conversation: &mut ConversationState,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<String> {
        conversation.append(Message::user(query));

        let tools = self.registry.schemas();
        let mut run = Run::new();

        loop {
            if cancel.is_cancelled() {
                run.transition(OrchestratorState::Terminated);
                return Err(Error::Cancelled);
            }

            let (turn, call_count) = self.await_model(conversation, &tools, &cancel).await?;

            match turn {
                ModelTurn::FinalAnswer(text) => {
                    run.transition(OrchestratorState::Final);
                    conversation.append(Message::assistant(text.clone()));
                    run.transition(OrchestratorState::Terminated);
                    info!(
                        rounds = run.rounds,
                        messages = conversation.len(),
                        "Run completed"
                    );
                    return Ok(text);
                }
                ModelTurn::ToolCall(request) => {
                    if run.rounds >= self.config.max_rounds {
                        run.transition(OrchestratorState::Terminated);
                        warn!(limit = self.config.max_rounds, tool = %request.name, "Round limit reached");
                        return Err(Error::MaxRoundsExceeded {
                            limit: self.config.max_rounds,
                        });
                    }
                    run.rounds += 1;
                    run.transition(OrchestratorState::Dispatching);

                    self.dispatch(conversation, request).await;

                    if call_count > 1 {
                        run.transition(OrchestratorState::Terminated);
                        return Err(Error::MultipleToolCalls { count: call_count });
                    }
                    run.transition(OrchestratorState::AwaitingModel);
                }
            }
        }
    }

    /// Submit the transcript and classify the reply
    async fn await_model(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<(ModelTurn, usize)> {
        let transcript = conversation.snapshot();
        let generate = tokio::time::timeout(
            self.config.model_timeout,
            self.model.generate(&transcript, tools),
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = generate => match outcome {
                Ok(response) => response?,
                Err(_) => return Err(Error::ModelTimeout(self.config.model_timeout)),
            },
        };

        let call_count = response.tool_calls.len();
        let turn = ModelTurn::classify(response)?;
        Ok((turn, call_count))
    }

    /// Record the call, invoke it, record the outcome
    async fn dispatch(&self, conversation: &mut ConversationState, request: ToolInvocationRequest) {
        conversation.append(Message::tool_call(&request));
        debug!(tool = %request.name, "Dispatching tool call");

        let outcome = match tokio::time::timeout(self.config.tool_timeout, self.registry.invoke(&request)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout {
                tool: request.name.clone(),
                after: self.config.tool_timeout,
            }),
        };

        match outcome {
            Ok(result) => {
                conversation.append(Message::tool_result(result.tool_name, result.payload));
            }
            Err(error) => {
                warn!(tool = %request.name, kind = error.kind(), "Tool call failed: {}", error);
                conversation.append(Message::tool_error(&request.name, &error));
            }
        }
    }
}
