//! Summarizer: the final report, optionally enriched by web search.
//!
//! Summarization is best-effort. A failed model call is reported as
//! `success: false` with a short locally built summary; it is never an error.

use pagepilot_agent::ExecutionResult;
use pagepilot_core::error::ProviderError;
use pagepilot_core::message::Message;
use pagepilot_core::provider::{Provider, ProviderRequest, ToolChoice};
use pagepilot_core::search::{SearchHit, WebSearch};
use pagepilot_core::tool::{Tool, ToolCall};
use pagepilot_tools::WebSearchTool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ModelSettings;
use crate::prompts::{SUMMARIZER_SYSTEM_PROMPT, truncate};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizationResult {
    pub summary: String,
    pub success: bool,
    #[serde(default)]
    pub sources: Vec<SearchHit>,
    /// The summary was reused or built locally, without a model call
    #[serde(default)]
    pub skipped_model: bool,
}

pub struct Summarizer {
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    search: Option<WebSearchTool>,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn Provider>, settings: ModelSettings) -> Self {
        Self {
            provider,
            settings,
            search: None,
        }
    }

    /// Offer the model a `web_search` tool while summarizing.
    pub fn with_search(mut self, search: Arc<dyn WebSearch>, max_results: usize) -> Self {
        self.search = Some(WebSearchTool::new(search, max_results));
        self
    }

    pub async fn summarize(
        &self,
        trajectory: &ExecutionResult,
        objective: &str,
        outcome_text: &str,
    ) -> SummarizationResult {
        if trajectory.finish_reason.is_fallback() {
            info!("Execution ended in the no-output fallback, reusing its text as the summary");
            return SummarizationResult {
                summary: outcome_text.to_string(),
                success: true,
                sources: vec![],
                skipped_model: true,
            };
        }

        match self.generate(trajectory, objective, outcome_text).await {
            Ok((summary, sources)) => {
                info!(chars = summary.len(), sources = sources.len(), "Summary generated");
                SummarizationResult {
                    summary,
                    success: true,
                    sources,
                    skipped_model: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "Summarization failed, using local summary");
                SummarizationResult {
                    summary: local_summary(trajectory, objective, outcome_text),
                    success: false,
                    sources: vec![],
                    skipped_model: true,
                }
            }
        }
    }

    async fn generate(
        &self,
        trajectory: &ExecutionResult,
        objective: &str,
        outcome_text: &str,
    ) -> Result<(String, Vec<SearchHit>), ProviderError> {
        let mut messages = vec![
            Message::system(SUMMARIZER_SYSTEM_PROMPT),
            Message::user(summary_prompt(trajectory, objective, outcome_text)),
        ];

        let mut request = ProviderRequest::new(&self.settings.model, messages.clone())
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);
        if let Some(search) = &self.search {
            request = request.with_tools(vec![search.to_definition()], ToolChoice::Auto);
        }

        let response = self.provider.complete(request).await?;
        let mut sources: Vec<SearchHit> = Vec::new();

        let text = match &self.search {
            Some(search) if !response.message.tool_calls.is_empty() => {
                // One round of searches, then the final report
                let calls = response.message.tool_calls.clone();
                messages.push(response.message);
                for tc in &calls {
                    let output = self.run_search(search, tc, &mut sources).await;
                    messages.push(Message::tool_result(&tc.id, output));
                }

                let follow_up = ProviderRequest::new(&self.settings.model, messages)
                    .with_temperature(self.settings.temperature)
                    .with_max_tokens(self.settings.max_tokens)
                    .with_tools(vec![search.to_definition()], ToolChoice::None);
                let final_response = self.provider.complete(follow_up).await?;
                final_response.message.content
            }
            _ => response.message.content,
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::NoOutput("model returned an empty summary".into()));
        }

        let mut summary = text.to_string();
        if !sources.is_empty() {
            summary.push_str("\n\n## Sources\n");
            for (i, hit) in sources.iter().enumerate() {
                summary.push_str(&format!("{}. [{}]({})\n", i + 1, hit.title, hit.url));
            }
        }
        Ok((summary, sources))
    }

    async fn run_search(
        &self,
        search: &WebSearchTool,
        tc: &pagepilot_core::message::MessageToolCall,
        sources: &mut Vec<SearchHit>,
    ) -> String {
        if tc.name != search.name() {
            return serde_json::json!({ "success": false, "error": format!("unknown tool: {}", tc.name) })
                .to_string();
        }
        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: tc.parsed_arguments(),
        };
        debug!(arguments = %call.arguments, "Summarizer web search");
        match search.execute(call.arguments).await {
            Ok(result) => {
                if let Some(hits) = result
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value::<Vec<SearchHit>>(d).ok())
                {
                    for hit in hits {
                        if !sources.iter().any(|s| s.url == hit.url) {
                            sources.push(hit);
                        }
                    }
                }
                result.to_json().to_string()
            }
            Err(e) => {
                warn!(error = %e, "Web search failed during summarization");
                serde_json::json!({ "success": false, "error": e.to_string() }).to_string()
            }
        }
    }
}

fn trajectory_lines(trajectory: &ExecutionResult) -> String {
    if trajectory.tool_executions.is_empty() {
        return "(no browser actions)".to_string();
    }
    trajectory
        .tool_executions
        .iter()
        .map(|t| {
            let input = truncate(&t.input.to_string(), 200).to_string();
            match (&t.error_text, t.is_success()) {
                (_, true) => format!("- {} {input}: ok", t.tool_name),
                (Some(err), false) => format!("- {} {input}: failed ({err})", t.tool_name),
                (None, false) => format!("- {} {input}: failed", t.tool_name),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn summary_prompt(trajectory: &ExecutionResult, objective: &str, outcome_text: &str) -> String {
    format!(
        "Objective: {objective}\n\n\
         Actions taken ({} of {} succeeded, finished: {}):\n{}\n\n\
         Outcome:\n{}",
        trajectory.successful_tools(),
        trajectory.tool_executions.len(),
        trajectory.finish_reason,
        trajectory_lines(trajectory),
        truncate(outcome_text, 6000)
    )
}

/// A short report built without the model.
pub fn local_summary(trajectory: &ExecutionResult, objective: &str, outcome_text: &str) -> String {
    let mut summary = format!(
        "## Summary\nObjective: {objective}\n{} of {} browser actions succeeded (finished: {}).\n",
        trajectory.successful_tools(),
        trajectory.tool_executions.len(),
        trajectory.finish_reason
    );
    let outcome = outcome_text.trim();
    if !outcome.is_empty() {
        summary.push_str(&format!("\n## Key Findings\n{}\n", truncate(outcome, 1000)));
    }
    summary
}
