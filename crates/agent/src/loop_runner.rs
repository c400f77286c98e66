//! The execution loop: a streaming tool-calling conversation with the model.
//!
//! Each step streams one model turn, executes the tool calls it produced
//! (through the approval gate and the retrying executor) and feeds the
//! results back. The loop stops at the first of:
//! - the model answering without a tool call,
//! - the step budget,
//! - `max_consecutive_errors` failed tool calls in a row,
//! - a navigation loop,
//! - cancellation (reported as [`Error::Cancelled`]).

use std::sync::Arc;

use pagepilot_config::AppConfig;
use pagepilot_core::error::{Error, ProviderError};
use pagepilot_core::message::{Conversation, Message, MessageToolCall};
use pagepilot_core::plan::Plan;
use pagepilot_core::provider::{Provider, ProviderRequest, ToolChoice, Usage};
use pagepilot_core::tool::ToolCall;
use pagepilot_tools::RetryingExecutor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalGate, REJECTED_ERROR};
use crate::execution::{
    ExecutionResult, ExecutionStep, FinishReason, ToolExecution, ToolExecutionState,
};
use crate::guard::{ErrorStreak, NavigationLoopDetector};
use crate::intent::expected_tool_for_intent;
use crate::stream_event::AgentStreamEvent;

/// Loop limits and model settings.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_steps: u32,
    pub max_consecutive_errors: u32,
    pub navigation_loop_window: usize,
    pub navigation_loop_threshold: usize,
}

impl LoopConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            model: config.model_for(config.default_provider),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_steps: config.workflow.max_steps,
            max_consecutive_errors: config.workflow.max_consecutive_errors,
            navigation_loop_window: config.workflow.navigation_loop_window,
            navigation_loop_threshold: config.workflow.navigation_loop_threshold,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// What one streamed model turn produced.
#[derive(Default)]
struct ModelTurn {
    text: String,
    tool_calls: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

pub struct ExecutionLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<RetryingExecutor>,
    config: LoopConfig,
    approval: Option<Arc<ApprovalGate>>,
    events: Option<mpsc::Sender<AgentStreamEvent>>,
    cancel: CancellationToken,
}

impl ExecutionLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<RetryingExecutor>, config: LoopConfig) -> Self {
        Self {
            provider,
            tools,
            config,
            approval: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_approval(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.approval = Some(gate);
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<AgentStreamEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    async fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(event).await;
        }
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                phase: "execute".into(),
            });
        }
        Ok(())
    }

    /// Run the loop on `conversation`, which must already hold the user turn.
    ///
    /// The system prompt replaces any existing one. Messages produced by the
    /// loop are appended to `conversation`, so a retry continues from here.
    pub async fn execute(
        &self,
        system_prompt: &str,
        conversation: &mut Conversation,
        plan: &Plan,
    ) -> Result<ExecutionResult, Error> {
        conversation.set_system_prompt(system_prompt);
        let expected_tool = conversation.last_user_content().and_then(expected_tool_for_intent);

        let definitions = self.tools.definitions();
        let mut full_text = String::new();
        let mut executions: Vec<ToolExecution> = Vec::new();
        let mut steps: Vec<ExecutionStep> = Vec::new();
        let mut usage = Usage::default();
        let mut errors = ErrorStreak::default();
        let mut navigation = NavigationLoopDetector::new(
            self.config.navigation_loop_window,
            self.config.navigation_loop_threshold,
        );
        let mut any_success = false;
        let mut finish_reason = FinishReason::StepBudget;

        info!(
            conversation_id = %conversation.id,
            tools = definitions.len(),
            max_steps = self.config.max_steps,
            "Starting execution loop"
        );

        for step in 1..=self.config.max_steps {
            self.check_cancelled()?;

            // The model must act before it may talk
            let tool_choice = if any_success {
                ToolChoice::Auto
            } else {
                ToolChoice::Required
            };
            let mut request = ProviderRequest::new(&self.config.model, conversation.messages.clone())
                .with_temperature(self.config.temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_tools(definitions.clone(), tool_choice);
            request.stream = true;

            debug!(step, ?tool_choice, "Execution loop step");

            let turn = match self.stream_turn(request).await {
                Ok(turn) => turn,
                Err(Error::Provider(e)) if e.is_no_output() => {
                    return Ok(self.no_output_fallback(plan, &e, usage, steps, executions).await);
                }
                Err(e) => return Err(e),
            };

            if turn.text.trim().is_empty() && turn.tool_calls.is_empty() {
                let e = ProviderError::NoOutput("model returned neither text nor tool calls".into());
                return Ok(self.no_output_fallback(plan, &e, usage, steps, executions).await);
            }

            if let Some(u) = &turn.usage {
                usage.add(u);
            }
            if !turn.text.is_empty() {
                if !full_text.is_empty() {
                    full_text.push('\n');
                }
                full_text.push_str(&turn.text);
            }

            if step == 1 {
                let actual = turn.tool_calls.first().map(|tc| tc.name.as_str());
                debug!(
                    expected = expected_tool.unwrap_or("none"),
                    actual = actual.unwrap_or("none"),
                    matched = expected_tool.is_some() && expected_tool == actual,
                    "Intent prediction"
                );
            }

            conversation.push(Message::assistant_with_tools(&turn.text, turn.tool_calls.clone()));
            steps.push(ExecutionStep {
                step,
                text: turn.text.clone(),
                tool_calls: turn.tool_calls.iter().map(|tc| tc.name.clone()).collect(),
                tool_choice,
                usage: turn.usage,
            });

            if turn.tool_calls.is_empty() {
                self.emit(AgentStreamEvent::StepFinish {
                    step,
                    tool_calls: 0,
                    usage: turn.usage,
                })
                .await;
                finish_reason = FinishReason::Stop;
                break;
            }

            let mut looped = false;
            for tc in &turn.tool_calls {
                self.check_cancelled()?;

                let (execution, rejected) = self.run_tool_call(tc).await?;
                let result_json = execution
                    .output
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({ "success": false, "error": execution.error_text }));
                conversation.push(Message::tool_result(&tc.id, result_json.to_string()));

                // A user rejection is an answer, not a tool failure
                if !rejected {
                    errors.record(execution.is_success());
                }
                if execution.is_success() {
                    any_success = true;
                    if execution.tool_name == "navigate" {
                        let target = execution.input["url"].as_str().unwrap_or_default();
                        looped |= navigation.record(target);
                    }
                }
                executions.push(execution);
            }

            self.emit(AgentStreamEvent::StepFinish {
                step,
                tool_calls: turn.tool_calls.len(),
                usage: turn.usage,
            })
            .await;

            if errors.current() >= self.config.max_consecutive_errors {
                warn!(step, errors = errors.current(), "Stopping: too many consecutive tool errors");
                finish_reason = FinishReason::ExcessiveErrors;
                break;
            }
            if looped {
                warn!(step, "Stopping: navigation loop detected");
                finish_reason = FinishReason::NavigationLoop;
                break;
            }
        }

        if finish_reason == FinishReason::StepBudget {
            warn!(max_steps = self.config.max_steps, "Stopping: step budget exhausted");
        }

        let steps_taken = steps.len() as u32;
        self.emit(AgentStreamEvent::Finish {
            finish_reason,
            usage,
            steps: steps_taken,
        })
        .await;

        info!(
            %finish_reason,
            steps = steps_taken,
            tool_calls = executions.len(),
            "Execution loop finished"
        );

        Ok(ExecutionResult {
            full_text,
            tool_executions: executions,
            finish_reason,
            usage,
            execution_steps: steps,
        })
    }

    /// Stream one model turn, forwarding text deltas as they arrive.
    async fn stream_turn(&self, request: ProviderRequest) -> Result<ModelTurn, Error> {
        let mut rx = self.provider.stream(request).await?;
        let mut turn = ModelTurn::default();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Error::Cancelled { phase: "execute".into() });
                }
                chunk = rx.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                self.emit(AgentStreamEvent::TextDelta { text: text.clone() }).await;
                turn.text.push_str(&text);
            }
            turn.tool_calls.extend(chunk.tool_calls);
            if let Some(u) = chunk.usage {
                turn.usage.get_or_insert_with(Usage::default).add(&u);
            }
            if chunk.done {
                break;
            }
        }

        for (i, tc) in turn.tool_calls.iter_mut().enumerate() {
            if tc.id.is_empty() {
                tc.id = format!("call_{}_{i}", uuid::Uuid::new_v4().simple());
            }
        }
        Ok(turn)
    }

    /// One tool call through the approval gate and the retrying executor.
    ///
    /// The flag is true when the approver rejected the call.
    async fn run_tool_call(&self, tc: &MessageToolCall) -> Result<(ToolExecution, bool), Error> {
        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: tc.parsed_arguments(),
        };
        let mut execution = ToolExecution::new(&call.id, &call.name).with_input(call.arguments.clone());

        self.emit(AgentStreamEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        })
        .await;

        if let Some(gate) = &self.approval
            && let Some(reason) = gate.check(&call)
        {
            execution.state = ToolExecutionState::ApprovalPending;
            self.emit(AgentStreamEvent::ApprovalRequested {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
                reason: reason.clone(),
            })
            .await;

            let decision = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(tool = %call.name, call_id = %call.id, "Cancelled while awaiting approval");
                    return Err(Error::Cancelled { phase: "execute".into() });
                }
                decision = gate.request(&call, &reason) => decision,
            };
            self.emit(AgentStreamEvent::ApprovalResolved {
                id: call.id.clone(),
                name: call.name.clone(),
                approved: decision.is_approved(),
            })
            .await;

            if !decision.is_approved() {
                info!(tool = %call.name, call_id = %call.id, "Tool call rejected by approver");
                let output = serde_json::json!({ "success": false, "error": REJECTED_ERROR });
                execution.fail(REJECTED_ERROR, Some(output.clone()));
                self.emit(AgentStreamEvent::ToolResult {
                    id: call.id,
                    name: call.name,
                    output,
                    success: false,
                    duration_ms: 0,
                    attempts: 0,
                })
                .await;
                return Ok((execution, true));
            }
        }

        let outcome = self.tools.execute(&call).await;
        execution.duration_ms = outcome.duration_ms;
        execution.attempts = outcome.attempts;

        let output = match outcome.result {
            Ok(result) if result.success => {
                let json = result.to_json();
                execution.succeed(json.clone());
                json
            }
            Ok(result) => {
                let json = result.to_json();
                execution.fail(&result.output, Some(json.clone()));
                json
            }
            Err(e) => {
                warn!(tool = %call.name, attempts = outcome.attempts, error = %e, "Tool execution failed");
                let json = serde_json::json!({ "success": false, "error": e.to_string() });
                execution.fail(e.to_string(), Some(json.clone()));
                json
            }
        };

        self.emit(AgentStreamEvent::ToolResult {
            id: call.id,
            name: call.name,
            output,
            success: execution.is_success(),
            duration_ms: execution.duration_ms,
            attempts: execution.attempts,
        })
        .await;

        Ok((execution, false))
    }

    /// A well-formed result for a model that produced nothing.
    ///
    /// Tool executions gathered before the failing turn are kept, followed by
    /// a failed `language_model` record.
    async fn no_output_fallback(
        &self,
        plan: &Plan,
        error: &ProviderError,
        usage: Usage,
        steps: Vec<ExecutionStep>,
        mut executions: Vec<ToolExecution>,
    ) -> ExecutionResult {
        warn!(error = %error, completed_tools = executions.len(), "Model produced no output, using fallback result");

        let full_text = fallback_text(plan);
        let mut failure = ToolExecution::new(
            format!("fallback_{}", uuid::Uuid::new_v4().simple()),
            "language_model",
        )
        .with_input(serde_json::json!({ "objective": plan.objective }));
        failure.fail(error.to_string(), None);
        executions.push(failure);

        self.emit(AgentStreamEvent::TextDelta {
            text: full_text.clone(),
        })
        .await;
        self.emit(AgentStreamEvent::Finish {
            finish_reason: FinishReason::NoOutputFallback,
            usage,
            steps: steps.len() as u32,
        })
        .await;

        ExecutionResult {
            full_text,
            tool_executions: executions,
            finish_reason: FinishReason::NoOutputFallback,
            usage,
            execution_steps: steps,
        }
    }
}

/// Plan-derived text used when the model produced nothing.
pub fn fallback_text(plan: &Plan) -> String {
    format!(
        "The language model returned no output, so the task could not be carried out.\n\n\
         Objective: {}\n\nPlanned steps:\n{}\n\n\
         Recommendation: check that the API key for the selected provider is valid, \
         that the model name is correct, and that the provider is reachable, then try again.",
        plan.objective,
        plan.describe_steps()
    )
}
