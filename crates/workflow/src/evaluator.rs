//! Evaluator: a second model call that scores an execution attempt.
//!
//! A failed evaluation never blocks the run. It degrades to a fixed verdict
//! that lets the workflow proceed without retrying.

use pagepilot_agent::ExecutionResult;
use pagepilot_config::EvaluationConfig;
use pagepilot_core::message::Message;
use pagepilot_core::plan::Plan;
use pagepilot_core::provider::{Provider, ProviderRequest, ResponseFormat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::ModelSettings;
use crate::prompts::{EVALUATOR_SYSTEM_PROMPT, truncate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Failed,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Quality::Excellent => "excellent",
            Quality::Good => "good",
            Quality::Acceptable => "acceptable",
            Quality::Poor => "poor",
            Quality::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStrategy {
    pub approach: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub modifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub quality: Quality,
    pub score: f64,
    pub completeness: f64,
    pub correctness: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub successes: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub should_retry: bool,
    #[serde(default = "proceed_by_default")]
    pub should_proceed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<RetryStrategy>,

    /// Set on locally computed verdicts; never read from the model
    #[serde(skip_deserializing, default)]
    pub is_fallback: bool,
}

fn proceed_by_default() -> bool {
    true
}

impl EvaluationResult {
    /// The verdict used when the evaluation call itself fails.
    pub fn fallback() -> Self {
        Self {
            quality: Quality::Poor,
            score: 0.5,
            completeness: 0.5,
            correctness: 0.5,
            issues: vec![],
            successes: vec![],
            recommendations: vec!["Evaluation was unavailable; review the result manually".into()],
            should_retry: false,
            should_proceed: true,
            retry_strategy: None,
            is_fallback: true,
        }
    }

    /// The verdict for an execution that ended in the no-output fallback.
    /// No model call is made for it.
    pub fn fallback_for_no_output() -> Self {
        Self {
            quality: Quality::Failed,
            score: 0.0,
            completeness: 0.0,
            correctness: 0.0,
            issues: vec!["The language model produced no output".into()],
            successes: vec![],
            recommendations: vec![
                "Check the API key and model name for the selected provider".into(),
                "Check that the provider endpoint is reachable".into(),
            ],
            should_retry: false,
            should_proceed: true,
            retry_strategy: None,
            is_fallback: true,
        }
    }

    /// Bring every score into [0, 1].
    pub fn clamped(mut self) -> Self {
        for value in [&mut self.score, &mut self.completeness, &mut self.correctness] {
            *value = if value.is_finite() { (*value).clamp(0.0, 1.0) } else { 0.5 };
        }
        self
    }

    /// Schema sent with the evaluation request.
    pub fn json_schema() -> serde_json::Value {
        let unit = serde_json::json!({ "type": "number", "minimum": 0, "maximum": 1 });
        let list = serde_json::json!({ "type": "array", "items": { "type": "string" } });
        serde_json::json!({
            "type": "object",
            "properties": {
                "quality": { "type": "string", "enum": ["excellent", "good", "acceptable", "poor", "failed"] },
                "score": unit,
                "completeness": unit,
                "correctness": unit,
                "issues": list,
                "successes": list,
                "recommendations": list,
                "shouldRetry": { "type": "boolean" },
                "shouldProceed": { "type": "boolean" },
                "retryStrategy": {
                    "type": "object",
                    "properties": {
                        "approach": { "type": "string" },
                        "focusAreas": list,
                        "modifications": list
                    },
                    "required": ["approach"]
                }
            },
            "required": ["quality", "score", "completeness", "correctness", "shouldRetry", "shouldProceed"]
        })
    }
}

/// The single retry gate: a poor verdict that names its issues and says
/// how to retry. `should_retry` alone is not enough.
pub fn should_immediately_retry(evaluation: &EvaluationResult) -> bool {
    evaluation.should_retry
        && evaluation.quality == Quality::Poor
        && !evaluation.issues.is_empty()
        && evaluation.retry_strategy.is_some()
}

pub struct Evaluator {
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
}

impl Evaluator {
    pub fn new(provider: Arc<dyn Provider>, settings: ModelSettings) -> Self {
        Self { provider, settings }
    }

    pub async fn evaluate(
        &self,
        execution: &ExecutionResult,
        query: &str,
        plan: &Plan,
        criteria: &EvaluationConfig,
    ) -> EvaluationResult {
        let request = ProviderRequest::new(
            &self.settings.model,
            vec![
                Message::system(EVALUATOR_SYSTEM_PROMPT),
                Message::user(evaluation_prompt(execution, query, plan, criteria)),
            ],
        )
        .with_temperature(self.settings.temperature.min(0.3))
        .with_max_tokens(self.settings.max_tokens)
        .with_response_format(ResponseFormat::JsonSchema {
            name: "evaluation".into(),
            schema: EvaluationResult::json_schema(),
        });

        let raw = match self.provider.generate_structured(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Evaluation failed, using fallback evaluation");
                return EvaluationResult::fallback();
            }
        };

        match serde_json::from_value::<EvaluationResult>(raw) {
            Ok(evaluation) => {
                let evaluation = evaluation.clamped();
                info!(
                    quality = %evaluation.quality,
                    score = evaluation.score,
                    should_retry = evaluation.should_retry,
                    should_proceed = evaluation.should_proceed,
                    issues = evaluation.issues.len(),
                    "Execution evaluated"
                );
                evaluation
            }
            Err(e) => {
                warn!(error = %e, "Evaluation did not match the schema, using fallback evaluation");
                EvaluationResult::fallback()
            }
        }
    }
}

/// The user prompt for one evaluation.
pub fn evaluation_prompt(
    execution: &ExecutionResult,
    query: &str,
    plan: &Plan,
    criteria: &EvaluationConfig,
) -> String {
    let tools = if execution.tool_executions.is_empty() {
        "(no tools ran)".to_string()
    } else {
        execution
            .tool_executions
            .iter()
            .map(|t| {
                let status = if t.is_success() { "ok" } else { "failed" };
                match &t.error_text {
                    Some(err) if !t.is_success() => {
                        format!("- {}: {status} ({}ms): {}", t.tool_name, t.duration_ms, err)
                    }
                    _ => format!("- {}: {status} ({}ms)", t.tool_name, t.duration_ms),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let required = if criteria.required_tools.is_empty() {
        "none".to_string()
    } else {
        criteria.required_tools.join(", ")
    };

    format!(
        "Original request: {query}\n\n\
         Plan:\n{}\n\n\
         Tool executions:\n{tools}\n\n\
         Success rate: {:.0}% ({} of {} tool calls succeeded)\n\
         Finish reason: {}\n\n\
         Agent output:\n{}\n\n\
         Criteria:\n\
         - required tools: {required}\n\
         - minimum success rate: {:.0}%\n\
         - maximum errors: {}\n\
         - minimum output length: {} characters",
        plan.describe_steps(),
        execution.success_rate() * 100.0,
        execution.successful_tools(),
        execution.tool_executions.len(),
        execution.finish_reason,
        truncate(&execution.full_text, 6000),
        criteria.min_success_rate * 100.0,
        criteria.max_errors,
        criteria.text_min_length,
    )
}
