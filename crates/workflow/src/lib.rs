//! The PagePilot workflow: planning, evaluation, bounded retry and summarization
//! around the agent's execution loop.
//!
//! [`Workflow`] drives the phases in order and records each one in a
//! [`TaskLedger`]. The planner, evaluator and summarizer each fall back to a
//! locally computed result when the model fails them, so only provider errors
//! raised during execution (or cancellation) abort a run.

pub mod evaluator;
pub mod ledger;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod repair;
pub mod retry;
pub mod summarizer;

use pagepilot_config::AppConfig;

pub use evaluator::{EvaluationResult, Evaluator, Quality, RetryStrategy};
pub use ledger::{LedgerError, Task, TaskId, TaskLedger, TaskStatus, TaskUpdate};
pub use orchestrator::{Workflow, WorkflowDeps, WorkflowOutput, WorkflowRequest};
pub use planner::{Planner, PlanningResult};
pub use repair::{normalize_action, repair_plan};
pub use retry::{RetryController, RetryOutcome};
pub use summarizer::{SummarizationResult, Summarizer};

/// Model parameters shared by the planner, evaluator and summarizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            model: config.model_for(config.default_provider),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}
