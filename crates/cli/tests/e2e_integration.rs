//! End-to-end tests for the PagePilot workflow.
//!
//! These drive the whole pipeline (plan, context, execute, evaluate, retry,
//! summarize) with a scripted model and the dry-run browser.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pagepilot_agent::test_helpers::{ScriptedProvider, ScriptedTurn, browser_executor, tool_call};
use pagepilot_agent::{AgentStreamEvent, ApprovalGate, FinishReason, ToolExecutionState};
use pagepilot_config::AppConfig;
use pagepilot_core::approval::{ApprovalDecision, ApprovalRequest, Approver};
use pagepilot_core::error::{ProviderError, ToolError};
use pagepilot_core::event::DomainEvent;
use pagepilot_core::plan::PlanAction;
use pagepilot_core::tool::ToolCall;
use pagepilot_security::ApprovalPolicy;
use pagepilot_tools::{
    BrowserBackend, DryRunBrowser, PageSnapshot, ScrollDirection, WaitCondition,
};
use pagepilot_workflow::evaluator::should_immediately_retry;
use pagepilot_workflow::planner::fallback_scores;
use pagepilot_workflow::{
    EvaluationResult, Quality, TaskId, TaskLedger, TaskStatus, Workflow, WorkflowDeps,
    WorkflowRequest, repair_plan,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Scripted turns ──────────────────────────────────────────────────────

fn example_plan() -> ScriptedTurn {
    ScriptedTurn::json(json!({
        "objective": "Read the title of example.com",
        "approach": "Open the page, then read it",
        "steps": [
            { "step": 1, "action": "navigate", "target": "https://example.com",
              "reasoning": "open the page", "expectedOutcome": "example.com loaded" },
            { "step": 2, "action": "getPageContext", "target": "current page",
              "reasoning": "read the title", "expectedOutcome": "title known" }
        ],
        "criticalPaths": [1, 2],
        "estimatedSteps": 2,
        "complexityScore": 0.2,
        "confidence": 0.9
    }))
}

fn good_verdict() -> ScriptedTurn {
    ScriptedTurn::json(json!({
        "quality": "good",
        "score": 0.9,
        "completeness": 0.9,
        "correctness": 0.95,
        "successes": ["title read"],
        "shouldRetry": false,
        "shouldProceed": true
    }))
}

fn poor_verdict() -> ScriptedTurn {
    ScriptedTurn::json(json!({
        "quality": "poor",
        "score": 0.3,
        "completeness": 0.2,
        "correctness": 0.4,
        "issues": ["z"],
        "shouldRetry": true,
        "shouldProceed": false,
        "retryStrategy": { "approach": "retry", "focusAreas": ["x"], "modifications": ["y"] }
    }))
}

fn report() -> ScriptedTurn {
    ScriptedTurn::text(
        "## Summary\nOpened example.com and read its title.\n\
         ## Goal Assessment\nAchieved.\n\
         ## Key Findings\nThe title is example.com.\n\
         ## Next Steps\nNone.",
    )
}

fn deps(provider: Arc<ScriptedProvider>, browser: Arc<dyn BrowserBackend>) -> WorkflowDeps {
    WorkflowDeps {
        provider,
        tools: browser_executor(browser),
        approval: None,
        search: None,
    }
}

// ── Test browsers and approvers ─────────────────────────────────────────

/// Fails the first `failures` clicks with a dropped-connection error.
struct FlakyBrowser {
    inner: DryRunBrowser,
    failures: u32,
    clicks: AtomicU32,
}

impl FlakyBrowser {
    fn new(failures: u32) -> Self {
        Self {
            inner: DryRunBrowser::new(),
            failures,
            clicks: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl BrowserBackend for FlakyBrowser {
    async fn navigate(&self, url: &str) -> Result<PageSnapshot, ToolError> {
        self.inner.navigate(url).await
    }

    async fn click(&self, selector: &str) -> Result<String, ToolError> {
        let n = self.clicks.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(ToolError::ExecutionFailed {
                tool_name: "click".into(),
                reason: "Could not establish connection. Receiving end does not exist.".into(),
            });
        }
        self.inner.click(selector).await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<String, ToolError> {
        self.inner.type_text(selector, text).await
    }

    async fn press_key(&self, key: &str) -> Result<String, ToolError> {
        self.inner.press_key(key).await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<String, ToolError> {
        self.inner.scroll(direction, amount).await
    }

    async fn wait(&self, condition: WaitCondition) -> Result<String, ToolError> {
        self.inner.wait(condition).await
    }

    async fn page_context(&self) -> Result<PageSnapshot, ToolError> {
        self.inner.page_context().await
    }

    async fn screenshot(&self) -> Result<String, ToolError> {
        self.inner.screenshot().await
    }
}

struct RejectAll {
    asked: AtomicU32,
}

#[async_trait]
impl Approver for RejectAll {
    async fn request_approval(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        self.asked.fetch_add(1, Ordering::SeqCst);
        ApprovalDecision::Rejected {
            reason: Some("not this site".into()),
        }
    }
}

// ── Scenario A: healthy run ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_healthy_run_reads_example_com() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::tools(vec![tool_call("navigate", json!({"url": "https://example.com"}))]),
        ScriptedTurn::tools(vec![tool_call("get_page_context", json!({}))]),
        ScriptedTurn::text("The page title is example.com."),
        good_verdict(),
        report(),
    ]));
    let browser = Arc::new(DryRunBrowser::new());
    let workflow = Workflow::new(deps(provider.clone(), browser.clone()), AppConfig::default());

    let output = workflow
        .run(
            WorkflowRequest::new("navigate to example.com and read the title"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(output.success);
    assert!(output.planning.plan.steps.len() >= 2);
    assert_eq!(output.planning.plan.steps[0].action, PlanAction::Navigate);
    assert_eq!(output.planning.plan.steps[1].action, PlanAction::GetPageContext);
    assert!(!output.planning.fallback_used);

    assert_eq!(output.execution.finish_reason, FinishReason::Stop);
    assert_eq!(output.execution.successful_tools(), 2);
    assert!(matches!(output.evaluation.quality, Quality::Good | Quality::Excellent));
    assert!(output.evaluation.should_proceed);
    assert_eq!(output.attempts, 1);

    let summary = output.summarization.unwrap();
    assert!(summary.success);
    assert!(summary.summary.contains("example.com"));
    assert_eq!(provider.remaining(), 0);

    let history = browser.history().await;
    assert!(history.contains(&"navigate https://example.com".to_string()));
}

// ── Scenario B: plan without steps is repaired ──────────────────────────

#[tokio::test]
async fn e2e_plan_without_steps_gets_default_step() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::json(json!({
            "objective": "Summarize this page",
            "approach": "Read it",
            "complexityScore": 0.1,
            "confidence": 0.8
        })),
        ScriptedTurn::text("This page is about examples."),
        good_verdict(),
        report(),
    ]));
    let output = Workflow::new(
        deps(provider, Arc::new(DryRunBrowser::new())),
        AppConfig::default(),
    )
    .run(WorkflowRequest::new("summarize this page"), CancellationToken::new())
    .await
    .unwrap();

    let plan = &output.planning.plan;
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].action, PlanAction::GetPageContext);
    assert_eq!(plan.estimated_steps, 1);
    assert_eq!(plan.critical_paths, vec![1]);
    assert!(plan.validate().is_ok());
}

// ── Scenario C: a poor verdict triggers one augmented retry ─────────────

#[tokio::test]
async fn e2e_poor_verdict_retries_with_augmented_prompt() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::text("I could not find the title."),
        poor_verdict(),
        ScriptedTurn::text("The page title is example.com."),
        good_verdict(),
        report(),
    ]));
    let workflow = Workflow::new(
        deps(provider.clone(), Arc::new(DryRunBrowser::new())),
        AppConfig::default(),
    );
    let mut events = workflow.events().subscribe();

    let output = workflow
        .run(WorkflowRequest::new("read the title of example.com"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.attempts, 2);
    assert_eq!(output.evaluation.quality, Quality::Good);

    // plan, exec, eval, exec (retry), eval, summary
    let requests = provider.requests();
    let retry_prompt = requests[3].messages[0].content.clone();
    assert!(retry_prompt.contains("RETRY ATTEMPT 1/2"));
    assert!(retry_prompt.contains("- z"));
    assert!(!requests[1].messages[0].content.contains("RETRY ATTEMPT"));

    let mut scheduled = 0;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::RetryScheduled { attempt, max_retries, issues, .. } = event.as_ref() {
            scheduled += 1;
            assert_eq!((*attempt, *max_retries), (1, 2));
            assert_eq!(issues, &vec!["z".to_string()]);
        }
    }
    assert_eq!(scheduled, 1);
}

// ── Scenario D: dropped connections are retried at the tool level ───────

#[tokio::test]
async fn e2e_receiving_end_error_is_retried_transparently() {
    let browser = Arc::new(FlakyBrowser::new(1));
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::tools(vec![tool_call("click", json!({"selector": "a.more"}))]),
        ScriptedTurn::text("Clicked the link."),
        good_verdict(),
        report(),
    ]));
    let (tx, mut rx) = mpsc::channel(256);
    let output = Workflow::new(deps(provider, browser.clone()), AppConfig::default())
        .with_stream(tx)
        .run(WorkflowRequest::new("click the more link"), CancellationToken::new())
        .await
        .unwrap();

    assert!(output.execution.tool_executions[0].is_success());
    assert_eq!(browser.clicks.load(Ordering::SeqCst), 2);

    let mut attempts = None;
    while let Ok(event) = rx.try_recv() {
        if let AgentStreamEvent::ToolResult { name, attempts: n, .. } = event
            && name == "click"
        {
            attempts = Some(n);
        }
    }
    assert_eq!(attempts, Some(2));
}

#[tokio::test]
async fn e2e_tool_retry_gives_up_after_three_attempts() {
    let browser = Arc::new(FlakyBrowser::new(u32::MAX));
    let executor = browser_executor(browser.clone());
    let outcome = executor
        .execute(&ToolCall {
            id: "c1".into(),
            name: "click".into(),
            arguments: json!({"selector": "button"}),
        })
        .await;

    assert!(outcome.result.is_err());
    assert_eq!(outcome.attempts, 3);
    assert_eq!(browser.clicks.load(Ordering::SeqCst), 3);
}

// ── P1: repaired plans are always valid ─────────────────────────────────

#[test]
fn e2e_repaired_plans_are_valid_even_from_hostile_output() {
    let inputs = [
        json!({}),
        json!({ "plan": { "steps": "not a list" } }),
        json!({ "steps": [ { "action": "teleport" }, { "action": "CLICK", "target": "" } ] }),
        json!({ "steps": [ {
            "action": "click", "target": "#buy",
            "fallbackAction": { "action": "scroll", "target": "down",
                "fallbackAction": { "action": "wait", "target": "1000" } }
        } ] }),
        json!({ "steps": (0..80).map(|i| json!({ "step": i, "action": "wait" })).collect::<Vec<_>>() }),
    ];

    for raw in &inputs {
        let plan = repair_plan(raw, "do something");
        assert!(plan.validate().is_ok(), "invalid plan from {raw}");
        assert!(!plan.steps.is_empty());
        for step in &plan.steps {
            assert!(PlanAction::ALL.contains(&step.action));
            if let Some(fallback) = &step.fallback_action {
                assert!(PlanAction::ALL.contains(&fallback.action));
            }
        }
        let text = serde_json::to_string(&plan).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        for step in value["steps"].as_array().unwrap() {
            assert!(step["fallbackAction"].get("fallbackAction").is_none());
        }
    }
}

// ── P2: heuristic fallback scores are deterministic and bounded ─────────

#[test]
fn e2e_fallback_scores_are_deterministic() {
    let queries = [
        "",
        "click",
        "please compare prices on https://a.com and https://b.com then fill the form and submit",
        "maybe something?",
    ];
    for query in queries {
        let first = fallback_scores(query);
        assert_eq!(first, fallback_scores(query));
        let (complexity, confidence) = first;
        assert!((0.0..=1.0).contains(&complexity));
        assert!((0.1..=1.0).contains(&confidence));
    }
}

// ── P3: retries are bounded ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_retries_stop_after_max_retries() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::text("attempt 1"),
        poor_verdict(),
        ScriptedTurn::text("attempt 2"),
        poor_verdict(),
        ScriptedTurn::text("attempt 3"),
        poor_verdict(),
        report(),
    ]));
    let output = Workflow::new(
        deps(provider.clone(), Arc::new(DryRunBrowser::new())),
        AppConfig::default(),
    )
    .run(WorkflowRequest::new("read the title"), CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(output.attempts, 3);
    assert_eq!(output.evaluation.quality, Quality::Poor);
    assert_eq!(provider.calls(), 8);
    assert_eq!(provider.remaining(), 0);
}

// ── P4: the retry gate needs every signal ───────────────────────────────

#[test]
fn e2e_retry_gate_requires_poor_issues_and_strategy() {
    let poor: EvaluationResult = serde_json::from_value(json!({
        "quality": "poor", "score": 0.3, "completeness": 0.3, "correctness": 0.3,
        "issues": ["z"], "shouldRetry": true,
        "retryStrategy": { "approach": "retry" }
    }))
    .unwrap();
    assert!(should_immediately_retry(&poor));

    let mut acceptable = poor.clone();
    acceptable.quality = Quality::Acceptable;
    assert!(!should_immediately_retry(&acceptable));

    let mut no_strategy = poor.clone();
    no_strategy.retry_strategy = None;
    assert!(!should_immediately_retry(&no_strategy));

    let mut no_issues = poor.clone();
    no_issues.issues.clear();
    assert!(!should_immediately_retry(&no_issues));
}

// ── P5: no output from the model ────────────────────────────────────────

#[tokio::test]
async fn e2e_no_output_falls_back_and_reuses_text() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::error(ProviderError::NoOutput("empty response".into())),
    ]));
    let ledger = Arc::new(TaskLedger::standard(1));
    let output = Workflow::new(
        deps(provider.clone(), Arc::new(DryRunBrowser::new())),
        AppConfig::default(),
    )
    .run_with_ledger(WorkflowRequest::new("read the title"), CancellationToken::new(), ledger.clone())
    .await
    .unwrap();

    assert!(!output.success);
    assert_eq!(output.execution.finish_reason, FinishReason::NoOutputFallback);
    assert_eq!(output.evaluation.quality, Quality::Failed);
    assert!(!output.evaluation.should_retry);
    assert_eq!(output.attempts, 1);

    let summary = output.summarization.unwrap();
    assert_eq!(summary.summary, output.execution.full_text);
    assert!(summary.skipped_model);
    assert!(summary.summary.contains("Read the title of example.com"));

    // plan + one execution turn; no evaluator or summarizer call
    assert_eq!(provider.calls(), 2);
    assert_eq!(ledger.get(TaskId::Summarize).unwrap().status, TaskStatus::Completed);
}

// ── P6: a rejected approval never runs the tool ─────────────────────────

#[tokio::test]
async fn e2e_rejected_navigation_never_reaches_the_browser() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::tools(vec![tool_call("navigate", json!({"url": "https://bank.test/transfer"}))]),
        ScriptedTurn::text("The navigation was cancelled."),
        good_verdict(),
        report(),
    ]));
    let approver = Arc::new(RejectAll {
        asked: AtomicU32::new(0),
    });
    let browser = Arc::new(DryRunBrowser::new());
    let config = AppConfig::default();
    let gate = ApprovalGate::new(ApprovalPolicy::new(&config.approval), Some(approver.clone()));

    let mut deps = deps(provider, browser.clone());
    deps.approval = Some(Arc::new(gate));
    let workflow = Workflow::new(deps, config);
    let mut events = workflow.events().subscribe();

    let output = workflow
        .run(WorkflowRequest::new("open my bank"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(approver.asked.load(Ordering::SeqCst), 1);
    let navigate = &output.execution.tool_executions[0];
    assert_eq!(navigate.tool_name, "navigate");
    assert_eq!(navigate.state, ToolExecutionState::OutputError);
    assert_eq!(navigate.output.as_ref().unwrap()["success"], json!(false));

    let history = browser.history().await;
    assert!(!history.iter().any(|h| h.starts_with("navigate")));

    let mut decided = None;
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::ApprovalDecided { approved, .. } = event.as_ref() {
            decided = Some(*approved);
        }
    }
    assert_eq!(decided, Some(false));
}

// ── P7: one task in progress at a time ──────────────────────────────────

#[tokio::test]
async fn e2e_ledger_never_runs_two_tasks_at_once() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::text("I could not find the title."),
        poor_verdict(),
        ScriptedTurn::text("The page title is example.com."),
        good_verdict(),
        report(),
    ]));
    let ledger = Arc::new(TaskLedger::standard(1));
    let active: Arc<Mutex<HashSet<TaskId>>> = Arc::default();
    let peak = Arc::new(AtomicU32::new(0));
    let transitions = Arc::new(Mutex::new(Vec::new()));
    {
        let active = active.clone();
        let peak = peak.clone();
        let transitions = transitions.clone();
        ledger.subscribe(move |update| {
            let mut active = active.lock().unwrap();
            if update.status == TaskStatus::InProgress {
                active.insert(update.id);
            } else {
                active.remove(&update.id);
            }
            peak.fetch_max(active.len() as u32, Ordering::SeqCst);
            transitions.lock().unwrap().push((update.id, update.status));
        });
    }

    Workflow::new(
        deps(provider, Arc::new(DryRunBrowser::new())),
        AppConfig::default(),
    )
    .run_with_ledger(WorkflowRequest::new("read the title"), CancellationToken::new(), ledger.clone())
    .await
    .unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(ledger.get_all().iter().all(|t| t.status == TaskStatus::Completed));

    // Retrying is reported to observers as in progress
    let transitions = transitions.lock().unwrap();
    let execute_in_progress = transitions
        .iter()
        .filter(|(id, status)| *id == TaskId::Execute && *status == TaskStatus::InProgress)
        .count();
    assert_eq!(execute_in_progress, 2);
    assert!(!transitions.iter().any(|(_, status)| *status == TaskStatus::Retrying));
}

// ── Cancellation ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_cancel_mid_run_skips_evaluation() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        example_plan(),
        ScriptedTurn::tools(vec![tool_call("wait", json!({"ms": 5000}))]),
        ScriptedTurn::text("done waiting"),
        good_verdict(),
        report(),
    ]));
    let cancel = CancellationToken::new();
    let ledger = Arc::new(TaskLedger::standard(1));
    {
        // Cancel as soon as execution starts
        let cancel = cancel.clone();
        ledger.subscribe(move |update| {
            if update.id == TaskId::Execute && update.status == TaskStatus::InProgress {
                cancel.cancel();
            }
        });
    }

    let err = Workflow::new(
        deps(provider.clone(), Arc::new(DryRunBrowser::new())),
        AppConfig::default(),
    )
    .run_with_ledger(WorkflowRequest::new("wait a bit"), cancel, ledger.clone())
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(ledger.get(TaskId::Evaluate).unwrap().status, TaskStatus::Pending);
    assert_eq!(ledger.get(TaskId::Summarize).unwrap().status, TaskStatus::Pending);
    assert!(provider.remaining() >= 2);
}
