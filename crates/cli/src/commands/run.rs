//! `pagepilot run`: drive one task through plan, execute, evaluate and summarize.
//!
//! Progress (ledger transitions, tool calls, streamed model text) is written
//! to stderr; the final report goes to stdout so it can be piped.

use clap::Args;
use pagepilot_agent::{AgentStreamEvent, ApprovalGate};
use pagepilot_config::AppConfig;
use pagepilot_core::approval::{Approver, AutoApprove};
use pagepilot_core::search::WebSearch;
use pagepilot_security::{AuditLogger, TracingSink};
use pagepilot_tools::{BraveSearch, DryRunBrowser, RetryingExecutor, ToolRetryConfig};
use pagepilot_workflow::{TaskLedger, TaskUpdate, Workflow, WorkflowDeps, WorkflowOutput, WorkflowRequest};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::approver::StdinApprover;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// What to do, in plain language
    pub query: String,

    /// URL of the page the task starts on
    #[arg(short, long)]
    pub url: Option<String>,

    /// Text of the current page, used instead of reading it from the browser
    #[arg(long)]
    pub page_context: Option<String>,

    /// Approve every sensitive action without asking
    #[arg(long)]
    pub auto_approve: bool,

    /// Print the whole workflow output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = pagepilot_providers::build_provider(&config)?;

    // Real browsers are attached by the host; the binary drives the dry-run backend
    let browser = Arc::new(DryRunBrowser::new());
    let tools = Arc::new(RetryingExecutor::new(
        pagepilot_tools::browser_registry(browser),
        ToolRetryConfig::from(&config.tools),
    ));

    let approver: Arc<dyn Approver> = if args.auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(StdinApprover)
    };
    let audit = Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)]));
    let approval = ApprovalGate::from_config(&config.approval, Some(approver)).with_audit(audit);

    let search = build_search(&config)?;

    let (stream_tx, stream_rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_stream(stream_rx));

    let ledger = Arc::new(TaskLedger::standard(config.workflow.ledger_concurrency));
    ledger.subscribe(|update: &TaskUpdate| print_task(update));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Cancelling...");
            on_interrupt.cancel();
        }
    });

    let workflow = Workflow::new(
        WorkflowDeps {
            provider,
            tools,
            approval: Some(Arc::new(approval)),
            search,
        },
        config,
    )
    .with_stream(stream_tx);

    let request = WorkflowRequest {
        query: args.query,
        current_url: args.url,
        page_context: args.page_context,
    };
    let result = workflow.run_with_ledger(request, cancel, ledger).await;

    // The workflow owns the last stream sender
    drop(workflow);
    if let Err(e) = printer.await {
        warn!(error = %e, "Stream printer ended abnormally");
    }

    let output = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        print!("{}", render(&output));
    }
    Ok(())
}

fn build_search(config: &AppConfig) -> Result<Option<Arc<dyn WebSearch>>, Box<dyn std::error::Error>> {
    if !config.search.enabled {
        return Ok(None);
    }
    match &config.search.api_key {
        Some(key) => {
            let search: Arc<dyn WebSearch> = Arc::new(BraveSearch::new(key.clone())?);
            Ok(Some(search))
        }
        None => {
            warn!("Web search is enabled but search.api_key is not set, continuing without it");
            Ok(None)
        }
    }
}

fn print_task(update: &TaskUpdate) {
    let note = update
        .description
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default();
    eprintln!("  [{}] {}{note}", update.id, update.status);
}

async fn print_stream(mut rx: mpsc::Receiver<AgentStreamEvent>) {
    let mut mid_line = false;
    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::TextDelta { text } => {
                eprint!("{text}");
                let _ = std::io::stderr().flush();
                mid_line = !text.ends_with('\n');
            }
            other => {
                if mid_line {
                    eprintln!();
                    mid_line = false;
                }
                if let Some(line) = describe_event(&other) {
                    eprintln!("{line}");
                }
            }
        }
    }
    if mid_line {
        eprintln!();
    }
}

fn describe_event(event: &AgentStreamEvent) -> Option<String> {
    match event {
        AgentStreamEvent::ToolCall { name, input, .. } => Some(format!("  → {name} {input}")),
        AgentStreamEvent::ToolResult {
            name,
            success,
            duration_ms,
            attempts,
            ..
        } => {
            let mark = if *success { "✅" } else { "❌" };
            let retries = if *attempts > 1 {
                format!(", {attempts} attempts")
            } else {
                String::new()
            };
            Some(format!("  {mark} {name} ({duration_ms}ms{retries})"))
        }
        AgentStreamEvent::ApprovalResolved { name, approved, .. } => Some(format!(
            "  {} {name}",
            if *approved { "approved:" } else { "rejected:" }
        )),
        AgentStreamEvent::Finish {
            finish_reason, steps, ..
        } => Some(format!("  finished after {steps} step(s): {finish_reason}")),
        _ => None,
    }
}

fn render(output: &WorkflowOutput) -> String {
    let report = output
        .summarization
        .as_ref()
        .map(|s| s.summary.clone())
        .unwrap_or_else(|| output.execution.full_text.clone());

    info!(
        workflow_id = %output.workflow_id,
        attempts = output.attempts,
        duration_ms = output.duration_ms,
        "Run complete"
    );

    let mut out = report.trim_end().to_string();
    out.push_str(&format!(
        "\n\n---\n{} | quality {} ({:.2}) | {} attempt(s) | {} of {} actions ok | {}ms\n",
        if output.success { "completed" } else { "fallback" },
        output.evaluation.quality,
        output.evaluation.score,
        output.attempts,
        output.execution.successful_tools(),
        output.execution.tool_executions.len(),
        output.duration_ms
    ));
    out
}
