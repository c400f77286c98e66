//! Retry controller: the bounded execute → evaluate loop.
//!
//! After each attempt the evaluator's verdict goes through
//! [`should_immediately_retry`]. When it says retry and budget is left, the
//! verdict is written into the system prompt as a `RETRY ATTEMPT n/max`
//! block and the loop runs again on the same conversation.

use chrono::Utc;
use pagepilot_agent::{ExecutionLoop, ExecutionResult};
use pagepilot_config::EvaluationConfig;
use pagepilot_core::error::Error;
use pagepilot_core::event::{DomainEvent, EventBus};
use pagepilot_core::message::{Conversation, Message};
use pagepilot_core::plan::Plan;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::evaluator::{EvaluationResult, Evaluator, should_immediately_retry};
use crate::ledger::{LedgerError, TaskId, TaskLedger};

/// The synthetic user turn that starts a retry.
pub const RETRY_USER_MESSAGE: &str = "The previous attempt did not fully accomplish the task. \
Try again, addressing the issues listed under RETRY ATTEMPT in your instructions.";

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub execution: ExecutionResult,
    pub evaluation: EvaluationResult,
    /// Execution attempts made, including the first
    pub attempts: u32,
    /// The system prompt of the last attempt, retry blocks included
    pub system_prompt: String,
}

pub struct RetryController {
    max_retries: u32,
    ledger: Option<Arc<TaskLedger>>,
    events: Option<(Arc<EventBus>, String)>,
    cancel: CancellationToken,
}

impl RetryController {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ledger: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<TaskLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>, workflow_id: impl Into<String>) -> Self {
        self.events = Some((bus, workflow_id.into()));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn track(&self, op: impl FnOnce(&TaskLedger) -> Result<(), LedgerError>) {
        if let Some(ledger) = &self.ledger
            && let Err(e) = op(ledger)
        {
            warn!(error = %e, "Task ledger rejected an update");
        }
    }

    fn publish(&self, make: impl FnOnce(String) -> DomainEvent) {
        if let Some((bus, workflow_id)) = &self.events {
            bus.publish(make(workflow_id.clone()));
        }
    }

    fn phase_completed(&self, phase: &str, success: bool, started: Instant) {
        self.publish(|workflow_id| DomainEvent::PhaseCompleted {
            workflow_id,
            phase: phase.into(),
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    fn phase_started(&self, phase: &str) {
        self.publish(|workflow_id| DomainEvent::PhaseStarted {
            workflow_id,
            phase: phase.into(),
            timestamp: Utc::now(),
        });
    }

    fn cancelled(&self, task: TaskId) -> Error {
        self.track(|l| l.cancel(task));
        Error::Cancelled {
            phase: task.as_str().into(),
        }
    }

    /// Run up to `1 + max_retries` execute/evaluate attempts.
    ///
    /// Only execution errors (cancellation, non-fallback provider errors)
    /// escape. Evaluation failures degrade to the fallback verdict.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        execution_loop: &ExecutionLoop,
        evaluator: &Evaluator,
        system_prompt: String,
        conversation: &mut Conversation,
        query: &str,
        plan: &Plan,
        criteria: &EvaluationConfig,
    ) -> Result<RetryOutcome, Error> {
        let mut system_prompt = system_prompt;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if attempt == 1 {
                self.track(|l| l.start(TaskId::Execute));
            } else {
                let note = format!("attempt {attempt}/{}", self.max_retries + 1);
                self.track(|l| l.retry(TaskId::Execute, Some(note)));
            }
            self.phase_started("execute");
            let started = Instant::now();

            let execution = match execution_loop.execute(&system_prompt, conversation, plan).await {
                Ok(result) => result,
                Err(e) => {
                    if e.is_cancelled() {
                        self.track(|l| l.cancel(TaskId::Execute));
                    } else {
                        self.track(|l| l.fail(TaskId::Execute, e.to_string()));
                    }
                    self.phase_completed("execute", false, started);
                    return Err(e);
                }
            };

            let note = format!(
                "{} tool call(s), finished: {}",
                execution.tool_executions.len(),
                execution.finish_reason
            );
            self.track(|l| l.complete(TaskId::Execute, Some(note)));
            self.phase_completed("execute", true, started);

            if self.cancel.is_cancelled() {
                return Err(self.cancelled(TaskId::Evaluate));
            }
            self.track(|l| l.start(TaskId::Evaluate));
            self.phase_started("evaluate");
            let started = Instant::now();

            // Retrying a credentials or connectivity problem will not help
            if execution.finish_reason.is_fallback() {
                warn!(attempt, "Execution produced no model output, skipping evaluation and retries");
                self.track(|l| l.complete(TaskId::Evaluate, Some("skipped: no model output".into())));
                self.publish(|_| DomainEvent::FallbackUsed {
                    phase: "evaluate".into(),
                    reason: "execution produced no model output".into(),
                    timestamp: Utc::now(),
                });
                self.phase_completed("evaluate", true, started);
                return Ok(RetryOutcome {
                    execution,
                    evaluation: EvaluationResult::fallback_for_no_output(),
                    attempts: attempt,
                    system_prompt,
                });
            }

            let evaluation = tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.cancelled(TaskId::Evaluate)),
                evaluation = evaluator.evaluate(&execution, query, plan, criteria) => evaluation,
            };
            if evaluation.is_fallback {
                self.publish(|_| DomainEvent::FallbackUsed {
                    phase: "evaluate".into(),
                    reason: "evaluation call failed".into(),
                    timestamp: Utc::now(),
                });
            }
            let note = format!("{} ({:.2})", evaluation.quality, evaluation.score);
            self.track(|l| l.complete(TaskId::Evaluate, Some(note)));
            self.phase_completed("evaluate", true, started);

            if !should_immediately_retry(&evaluation) {
                if !evaluation.should_proceed {
                    warn!(
                        quality = %evaluation.quality,
                        "Evaluator advised against proceeding; continuing with this result"
                    );
                }
                return Ok(RetryOutcome {
                    execution,
                    evaluation,
                    attempts: attempt,
                    system_prompt,
                });
            }

            if attempt > self.max_retries {
                warn!(
                    attempts = attempt,
                    max_retries = self.max_retries,
                    "Retry budget exhausted, proceeding with the last result"
                );
                return Ok(RetryOutcome {
                    execution,
                    evaluation,
                    attempts: attempt,
                    system_prompt,
                });
            }

            info!(
                retry = attempt,
                max_retries = self.max_retries,
                issues = evaluation.issues.len(),
                "Scheduling retry"
            );
            system_prompt.push_str(&retry_block(attempt, self.max_retries, &evaluation));
            conversation.push(Message::user(RETRY_USER_MESSAGE));
            self.publish(|workflow_id| DomainEvent::RetryScheduled {
                workflow_id,
                attempt,
                max_retries: self.max_retries,
                issues: evaluation.issues.clone(),
                timestamp: Utc::now(),
            });
        }
    }
}

/// The block appended to the system prompt before retry `retry`.
pub fn retry_block(retry: u32, max_retries: u32, evaluation: &EvaluationResult) -> String {
    let bullets = |items: &[String]| -> String {
        items.iter().map(|i| format!("- {i}\n")).collect::<String>()
    };

    let mut block = format!(
        "\n\n## RETRY ATTEMPT {retry}/{max_retries}\n\
         The previous attempt was rated {} (score {:.2}).\n\
         Issues found:\n{}",
        evaluation.quality,
        evaluation.score,
        bullets(&evaluation.issues)
    );
    if let Some(strategy) = &evaluation.retry_strategy {
        block.push_str(&format!("Approach: {}\n", strategy.approach));
        if !strategy.focus_areas.is_empty() {
            block.push_str(&format!("Focus on:\n{}", bullets(&strategy.focus_areas)));
        }
        if !strategy.modifications.is_empty() {
            block.push_str(&format!("Change:\n{}", bullets(&strategy.modifications)));
        }
    }
    block
}
