//! Records produced by one execution-loop run.

use chrono::{DateTime, Utc};
use pagepilot_core::provider::{ToolChoice, Usage};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single tool invocation.
///
/// `InputStreaming → InputAvailable → [ApprovalPending] → OutputAvailable | OutputError`.
/// A rejected approval goes straight from `ApprovalPending` to `OutputError`
/// without the tool ever running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolExecutionState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
    ApprovalPending,
}

impl ToolExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::OutputAvailable | Self::OutputError)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolExecutionState,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,

    /// Tool-level attempts, including retries of transient failures
    #[serde(default)]
    pub attempts: u32,
}

impl ToolExecution {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            state: ToolExecutionState::InputStreaming,
            input: serde_json::Value::Object(Default::default()),
            output: None,
            error_text: None,
            timestamp: Utc::now(),
            duration_ms: 0,
            attempts: 0,
        }
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self.state = ToolExecutionState::InputAvailable;
        self
    }

    pub fn succeed(&mut self, output: serde_json::Value) {
        self.state = ToolExecutionState::OutputAvailable;
        self.output = Some(output);
    }

    pub fn fail(&mut self, error: impl Into<String>, output: Option<serde_json::Value>) {
        self.state = ToolExecutionState::OutputError;
        self.error_text = Some(error.into());
        self.output = output;
    }

    pub fn is_success(&self) -> bool {
        self.state == ToolExecutionState::OutputAvailable
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model answered without calling a tool
    Stop,
    StepBudget,
    ExcessiveErrors,
    NavigationLoop,
    /// The model produced nothing; the text was built locally
    NoOutputFallback,
}

impl FinishReason {
    pub fn is_fallback(&self) -> bool {
        matches!(self, FinishReason::NoOutputFallback)
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::Stop => "stop",
            FinishReason::StepBudget => "step_budget",
            FinishReason::ExcessiveErrors => "excessive_errors",
            FinishReason::NavigationLoop => "navigation_loop",
            FinishReason::NoOutputFallback => "no_output_fallback",
        };
        f.write_str(s)
    }
}

/// One model step: the text it produced and the tools it called.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub step: u32,
    pub text: String,
    pub tool_calls: Vec<String>,
    pub tool_choice: ToolChoice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub full_text: String,
    pub tool_executions: Vec<ToolExecution>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub execution_steps: Vec<ExecutionStep>,
}

impl ExecutionResult {
    pub fn successful_tools(&self) -> usize {
        self.tool_executions.iter().filter(|t| t.is_success()).count()
    }

    pub fn failed_tools(&self) -> usize {
        self.tool_executions.len() - self.successful_tools()
    }

    /// Successful tool calls as a fraction of all calls; 0 when none ran.
    pub fn success_rate(&self) -> f64 {
        if self.tool_executions.is_empty() {
            0.0
        } else {
            self.successful_tools() as f64 / self.tool_executions.len() as f64
        }
    }

    pub fn used_tool(&self, name: &str) -> bool {
        self.tool_executions.iter().any(|t| t.tool_name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(name: &str, ok: bool) -> ToolExecution {
        let mut e = ToolExecution::new("c", name).with_input(serde_json::json!({}));
        if ok {
            e.succeed(serde_json::json!({"success": true}));
        } else {
            e.fail("boom", None);
        }
        e
    }

    #[test]
    fn state_names_are_kebab_case() {
        let json = serde_json::to_string(&ToolExecutionState::ApprovalPending).unwrap();
        assert_eq!(json, "\"approval-pending\"");
        assert!(ToolExecutionState::OutputError.is_terminal());
        assert!(!ToolExecutionState::ApprovalPending.is_terminal());
    }

    #[test]
    fn success_rate() {
        let result = ExecutionResult {
            full_text: String::new(),
            tool_executions: vec![exec("navigate", true), exec("click", false), exec("click", true)],
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            execution_steps: vec![],
        };
        assert_eq!(result.successful_tools(), 2);
        assert_eq!(result.failed_tools(), 1);
        assert!((result.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!(result.used_tool("navigate"));
        assert!(!result.used_tool("scroll"));
    }

    #[test]
    fn empty_success_rate_is_zero() {
        let result = ExecutionResult {
            full_text: "hi".into(),
            tool_executions: vec![],
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            execution_steps: vec![],
        };
        assert_eq!(result.success_rate(), 0.0);
    }
}
