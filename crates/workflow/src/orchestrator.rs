//! The workflow: Plan → Context → Execute ⇄ Evaluate (bounded retry) → Summarize.
//!
//! Phases run strictly in sequence. Each run owns its task ledger; the
//! collaborators in [`WorkflowDeps`] are shared and may serve concurrent runs.

use chrono::Utc;
use pagepilot_agent::{AgentStreamEvent, ApprovalGate, ExecutionLoop, ExecutionResult, LoopConfig};
use pagepilot_config::AppConfig;
use pagepilot_core::error::Error;
use pagepilot_core::event::{DomainEvent, EventBus};
use pagepilot_core::message::Conversation;
use pagepilot_core::provider::Provider;
use pagepilot_core::search::WebSearch;
use pagepilot_core::tool::ToolCall;
use pagepilot_tools::RetryingExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ModelSettings;
use crate::evaluator::{EvaluationResult, Evaluator};
use crate::ledger::{TaskId, TaskLedger};
use crate::planner::{Planner, PlanningResult};
use crate::prompts::execution_system_prompt;
use crate::retry::RetryController;
use crate::summarizer::{SummarizationResult, Summarizer};

/// Shared collaborators for workflow runs.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<RetryingExecutor>,
    pub approval: Option<Arc<ApprovalGate>>,
    pub search: Option<Arc<dyn WebSearch>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_context: Option<String>,
}

impl WorkflowRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutput {
    pub success: bool,
    pub planning: PlanningResult,
    pub execution: ExecutionResult,
    pub evaluation: EvaluationResult,
    pub summarization: Option<SummarizationResult>,
    pub duration_ms: u64,
    pub workflow_id: String,
    /// Execution attempts, including retries
    pub attempts: u32,
}

pub struct Workflow {
    deps: WorkflowDeps,
    config: AppConfig,
    events: Arc<EventBus>,
    stream: Option<mpsc::Sender<AgentStreamEvent>>,
}

impl Workflow {
    pub fn new(deps: WorkflowDeps, config: AppConfig) -> Self {
        Self {
            deps,
            config,
            events: Arc::new(EventBus::default()),
            stream: None,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Forward execution-loop stream events (text deltas, tool calls) here.
    pub fn with_stream(mut self, stream: mpsc::Sender<AgentStreamEvent>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run with a fresh ledger.
    pub async fn run(&self, request: WorkflowRequest, cancel: CancellationToken) -> Result<WorkflowOutput, Error> {
        let ledger = Arc::new(TaskLedger::standard(self.config.workflow.ledger_concurrency));
        self.run_with_ledger(request, cancel, ledger).await
    }

    /// Run with a caller-supplied ledger, so observers can subscribe first.
    pub async fn run_with_ledger(
        &self,
        request: WorkflowRequest,
        cancel: CancellationToken,
        ledger: Arc<TaskLedger>,
    ) -> Result<WorkflowOutput, Error> {
        let workflow_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let settings = ModelSettings::from_app(&self.config);
        info!(workflow_id = %workflow_id, query = %request.query, "Workflow started");

        // ── Plan ────────────────────────────────────────────────────────
        let phase = self.begin(&ledger, &workflow_id, TaskId::Plan, &cancel)?;
        let planner = Planner::new(self.deps.provider.clone(), settings.clone(), self.config.workflow.planner_attempts);
        let planning = tokio::select! {
            _ = cancel.cancelled() => return Err(self.abort(&ledger, TaskId::Plan)),
            planning = planner.plan(
                &request.query,
                request.current_url.as_deref(),
                request.page_context.as_deref(),
            ) => planning,
        };
        if planning.fallback_used {
            self.events.publish(DomainEvent::FallbackUsed {
                phase: "plan".into(),
                reason: "planner could not produce a plan".into(),
                timestamp: Utc::now(),
            });
        }
        let note = format!(
            "{} step(s), confidence {:.2}",
            planning.plan.steps.len(),
            planning.confidence
        );
        self.finish(&ledger, &workflow_id, TaskId::Plan, phase, Some(note));

        // ── Context ─────────────────────────────────────────────────────
        let phase = self.begin(&ledger, &workflow_id, TaskId::Context, &cancel)?;
        let page_context = match &request.page_context {
            Some(ctx) => Some(ctx.clone()),
            None => tokio::select! {
                _ = cancel.cancelled() => return Err(self.abort(&ledger, TaskId::Context)),
                ctx = self.gather_context() => ctx,
            },
        };
        let note = if page_context.is_some() {
            "page context captured"
        } else {
            "no page context"
        };
        self.finish(&ledger, &workflow_id, TaskId::Context, phase, Some(note.into()));

        // ── Execute ⇄ Evaluate ──────────────────────────────────────────
        if cancel.is_cancelled() {
            return Err(self.abort(&ledger, TaskId::Execute));
        }
        let system_prompt = execution_system_prompt(
            &planning.plan,
            request.current_url.as_deref(),
            page_context.as_deref(),
        );
        let mut conversation = Conversation::from_user(&request.query);

        let (agent_tx, agent_rx) = mpsc::channel::<AgentStreamEvent>(256);
        let forwarder = tokio::spawn(forward_agent_events(
            agent_rx,
            self.stream.clone(),
            self.events.clone(),
        ));

        let mut execution_loop = ExecutionLoop::new(
            self.deps.provider.clone(),
            self.deps.tools.clone(),
            LoopConfig::from_app(&self.config),
        )
        .with_events(agent_tx)
        .with_cancellation(cancel.clone());
        if let Some(gate) = &self.deps.approval {
            execution_loop = execution_loop.with_approval(gate.clone());
        }
        let evaluator = Evaluator::new(self.deps.provider.clone(), settings.clone());
        let controller = RetryController::new(self.config.workflow.max_retries)
            .with_ledger(ledger.clone())
            .with_events(self.events.clone(), workflow_id.clone())
            .with_cancellation(cancel.clone());

        let outcome = controller
            .run(
                &execution_loop,
                &evaluator,
                system_prompt,
                &mut conversation,
                &request.query,
                &planning.plan,
                &self.config.workflow.evaluation,
            )
            .await;

        // Closing the loop's sender ends the forwarder
        drop(execution_loop);
        match forwarder.await {
            Ok(0) => {}
            Ok(dropped) => debug!(workflow_id = %workflow_id, dropped, "Stream events dropped by a full caller channel"),
            Err(e) => warn!(error = %e, "Event forwarder ended abnormally"),
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if !e.is_cancelled() {
                    error!(workflow_id = %workflow_id, error = %e, "Execution failed");
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: "execute".into(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                } else {
                    info!(workflow_id = %workflow_id, "Workflow cancelled");
                }
                return Err(e);
            }
        };

        // ── Summarize ───────────────────────────────────────────────────
        let summarization = if self.config.workflow.summarize {
            let phase = self.begin(&ledger, &workflow_id, TaskId::Summarize, &cancel)?;
            let mut summarizer = Summarizer::new(self.deps.provider.clone(), settings);
            if let Some(search) = &self.deps.search {
                summarizer = summarizer.with_search(search.clone(), self.config.search.max_results);
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(self.abort(&ledger, TaskId::Summarize)),
                result = summarizer.summarize(
                    &outcome.execution,
                    &planning.plan.objective,
                    &outcome.execution.full_text,
                ) => result,
            };
            if result.success {
                self.finish(&ledger, &workflow_id, TaskId::Summarize, phase, None);
            } else {
                if let Err(e) = ledger.fail(TaskId::Summarize, "summary model call failed") {
                    warn!(error = %e, "Task ledger rejected an update");
                }
                self.phase_completed(&workflow_id, TaskId::Summarize, false, phase);
            }
            Some(result)
        } else {
            debug!("Summarization disabled");
            if let Err(e) = ledger.complete(TaskId::Summarize, Some("disabled".into())) {
                warn!(error = %e, "Task ledger rejected an update");
            }
            None
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let success = !outcome.execution.finish_reason.is_fallback();
        info!(
            workflow_id = %workflow_id,
            success,
            attempts = outcome.attempts,
            quality = %outcome.evaluation.quality,
            duration_ms,
            "Workflow finished"
        );

        Ok(WorkflowOutput {
            success,
            planning,
            execution: outcome.execution,
            evaluation: outcome.evaluation,
            summarization,
            duration_ms,
            workflow_id,
            attempts: outcome.attempts,
        })
    }

    /// Run `get_page_context` when the tool set has it. Best effort.
    async fn gather_context(&self) -> Option<String> {
        if !self.deps.tools.contains("get_page_context") {
            return None;
        }
        let call = ToolCall {
            id: format!("context_{}", uuid::Uuid::new_v4().simple()),
            name: "get_page_context".into(),
            arguments: serde_json::json!({}),
        };
        match self.deps.tools.execute(&call).await.result {
            Ok(result) if result.success => Some(result.output),
            Ok(result) => {
                warn!(output = %result.output, "Page context unavailable");
                None
            }
            Err(e) => {
                warn!(error = %e, "Page context unavailable");
                None
            }
        }
    }

    fn begin(
        &self,
        ledger: &TaskLedger,
        workflow_id: &str,
        task: TaskId,
        cancel: &CancellationToken,
    ) -> Result<Instant, Error> {
        if cancel.is_cancelled() {
            return Err(self.abort(ledger, task));
        }
        if let Err(e) = ledger.start(task) {
            warn!(error = %e, "Task ledger rejected an update");
        }
        info!(workflow_id = %workflow_id, phase = %task, "Phase started");
        self.events.publish(DomainEvent::PhaseStarted {
            workflow_id: workflow_id.to_string(),
            phase: task.as_str().into(),
            timestamp: Utc::now(),
        });
        Ok(Instant::now())
    }

    fn finish(&self, ledger: &TaskLedger, workflow_id: &str, task: TaskId, started: Instant, note: Option<String>) {
        if let Err(e) = ledger.complete(task, note) {
            warn!(error = %e, "Task ledger rejected an update");
        }
        self.phase_completed(workflow_id, task, true, started);
    }

    fn phase_completed(&self, workflow_id: &str, task: TaskId, success: bool, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(workflow_id = %workflow_id, phase = %task, success, duration_ms, "Phase completed");
        self.events.publish(DomainEvent::PhaseCompleted {
            workflow_id: workflow_id.to_string(),
            phase: task.as_str().into(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn abort(&self, ledger: &TaskLedger, task: TaskId) -> Error {
        if let Err(e) = ledger.cancel(task) {
            warn!(error = %e, "Task ledger rejected an update");
        }
        info!(phase = %task, "Workflow cancelled");
        Error::Cancelled {
            phase: task.as_str().into(),
        }
    }
}

/// Fan the loop's stream events out to the caller and the domain event bus.
///
/// Returns how many events the caller's channel had no room for.
async fn forward_agent_events(
    mut rx: mpsc::Receiver<AgentStreamEvent>,
    mut stream: Option<mpsc::Sender<AgentStreamEvent>>,
    events: Arc<EventBus>,
) -> usize {
    let mut dropped = 0;
    while let Some(event) = rx.recv().await {
        match &event {
            AgentStreamEvent::ToolResult {
                name,
                success,
                duration_ms,
                attempts,
                ..
            } => events.publish(DomainEvent::ToolExecuted {
                tool_name: name.clone(),
                success: *success,
                duration_ms: *duration_ms,
                attempts: *attempts,
                timestamp: Utc::now(),
            }),
            AgentStreamEvent::ApprovalResolved { name, approved, .. } => {
                events.publish(DomainEvent::ApprovalDecided {
                    tool_name: name.clone(),
                    approved: *approved,
                    timestamp: Utc::now(),
                })
            }
            _ => {}
        }
        if let Some(tx) = &stream {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    dropped += 1;
                    debug!(event = event.event_type(), dropped, "Caller stream full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Caller stream closed, no longer forwarding");
                    stream = None;
                }
            }
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TaskStatus;
    use pagepilot_agent::test_helpers::{ScriptedProvider, ScriptedTurn, browser_executor, tool_call};
    use pagepilot_core::error::ProviderError;
    use pagepilot_tools::DryRunBrowser;
    use serde_json::json;

    fn deps(provider: Arc<ScriptedProvider>) -> WorkflowDeps {
        WorkflowDeps {
            provider,
            tools: browser_executor(Arc::new(DryRunBrowser::new())),
            approval: None,
            search: None,
        }
    }

    fn plan_turn() -> ScriptedTurn {
        ScriptedTurn::json(json!({
            "objective": "Read the title of example.com",
            "approach": "Open then read",
            "steps": [
                { "step": 1, "action": "navigate", "target": "https://example.com", "reasoning": "open", "expectedOutcome": "loaded" },
                { "step": 2, "action": "getPageContext", "target": "page", "reasoning": "read", "expectedOutcome": "title known" }
            ],
            "criticalPaths": [1],
            "estimatedSteps": 2,
            "complexityScore": 0.2,
            "confidence": 0.9
        }))
    }

    #[tokio::test]
    async fn full_run_records_every_phase() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            plan_turn(),
            ScriptedTurn::tools(vec![tool_call("navigate", json!({"url": "https://example.com"}))]),
            ScriptedTurn::text("The page title is example.com"),
            ScriptedTurn::json(json!({
                "quality": "good", "score": 0.9, "completeness": 0.9, "correctness": 0.9,
                "shouldRetry": false, "shouldProceed": true
            })),
            ScriptedTurn::text("## Summary\nexample.com was opened."),
        ]));
        let (tx, mut rx) = mpsc::channel(256);
        let workflow = Workflow::new(deps(provider), AppConfig::default()).with_stream(tx);
        let mut domain = workflow.events().subscribe();
        let ledger = Arc::new(TaskLedger::standard(1));

        let output = workflow
            .run_with_ledger(WorkflowRequest::new("navigate to example.com and read the title"), CancellationToken::new(), ledger.clone())
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.attempts, 1);
        assert!(output.summarization.unwrap().success);
        assert!(ledger.get_all().iter().all(|t| t.status == TaskStatus::Completed));

        let mut saw_text = false;
        while let Ok(event) = rx.try_recv() {
            saw_text |= matches!(event, AgentStreamEvent::TextDelta { .. });
        }
        assert!(saw_text);

        let mut phases = Vec::new();
        let mut tools = 0;
        while let Ok(event) = domain.try_recv() {
            match event.as_ref() {
                DomainEvent::PhaseStarted { phase, .. } => phases.push(phase.clone()),
                DomainEvent::ToolExecuted { .. } => tools += 1,
                _ => {}
            }
        }
        assert_eq!(phases, vec!["plan", "context", "execute", "evaluate", "summarize"]);
        // context gathering runs outside the loop, so only the navigate counts
        assert_eq!(tools, 1);
    }

    #[tokio::test]
    async fn provider_errors_propagate_and_mark_execute() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            plan_turn(),
            ScriptedTurn::error(ProviderError::AuthenticationFailed("bad key".into())),
        ]));
        let ledger = Arc::new(TaskLedger::standard(1));
        let err = Workflow::new(deps(provider), AppConfig::default())
            .run_with_ledger(WorkflowRequest::new("read"), CancellationToken::new(), ledger.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(ledger.get(TaskId::Execute).unwrap().status, TaskStatus::Error);
        assert_eq!(ledger.get(TaskId::Summarize).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ledger = Arc::new(TaskLedger::standard(1));
        let err = Workflow::new(deps(provider.clone()), AppConfig::default())
            .run_with_ledger(WorkflowRequest::new("read"), cancel, ledger.clone())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(ledger.get(TaskId::Plan).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn summarization_can_be_disabled() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            plan_turn(),
            ScriptedTurn::text("The page title is example.com"),
            ScriptedTurn::json(json!({
                "quality": "acceptable", "score": 0.7, "completeness": 0.7, "correctness": 0.7,
                "shouldRetry": false, "shouldProceed": true
            })),
        ]));
        let mut config = AppConfig::default();
        config.workflow.summarize = false;
        let output = Workflow::new(deps(provider.clone()), config)
            .run(WorkflowRequest::new("read the title"), CancellationToken::new())
            .await
            .unwrap();
        assert!(output.summarization.is_none());
        assert_eq!(provider.remaining(), 0);
    }

    /// A page-context tool that never answers.
    struct HangingContext;

    #[async_trait::async_trait]
    impl pagepilot_core::tool::Tool for HangingContext {
        fn name(&self) -> &str {
            "get_page_context"
        }
        fn description(&self) -> &str {
            "never returns"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> Result<pagepilot_core::tool::ToolResult, pagepilot_core::error::ToolError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_context_gathering() {
        let mut registry = pagepilot_core::tool::ToolRegistry::new();
        registry.register(Arc::new(HangingContext));
        let provider = Arc::new(ScriptedProvider::new(vec![plan_turn()]));
        let deps = WorkflowDeps {
            provider: provider.clone(),
            tools: Arc::new(RetryingExecutor::new(registry, pagepilot_tools::ToolRetryConfig::default())),
            approval: None,
            search: None,
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let ledger = Arc::new(TaskLedger::standard(1));
        let workflow = Workflow::new(deps, AppConfig::default());
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            workflow.run_with_ledger(WorkflowRequest::new("read the title"), cancel, ledger.clone()),
        )
        .await
        .expect("run should return promptly after cancellation")
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(ledger.get(TaskId::Context).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(ledger.get(TaskId::Execute).unwrap().status, TaskStatus::Pending);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn full_caller_stream_counts_dropped_events() {
        let (agent_tx, agent_rx) = mpsc::channel(16);
        let (stream_tx, mut stream_rx) = mpsc::channel(1);
        for i in 0..3 {
            agent_tx
                .send(AgentStreamEvent::TextDelta { text: format!("chunk {i}") })
                .await
                .unwrap();
        }
        drop(agent_tx);

        let dropped = forward_agent_events(agent_rx, Some(stream_tx), Arc::new(EventBus::default())).await;

        assert_eq!(dropped, 2);
        assert!(matches!(stream_rx.recv().await, Some(AgentStreamEvent::TextDelta { text }) if text == "chunk 0"));
    }

    #[tokio::test]
    async fn closed_caller_stream_is_not_counted() {
        let (agent_tx, agent_rx) = mpsc::channel(16);
        let (stream_tx, stream_rx) = mpsc::channel(1);
        drop(stream_rx);
        agent_tx
            .send(AgentStreamEvent::TextDelta { text: "hi".into() })
            .await
            .unwrap();
        drop(agent_tx);

        let dropped = forward_agent_events(agent_rx, Some(stream_tx), Arc::new(EventBus::default())).await;
        assert_eq!(dropped, 0);
    }
}
