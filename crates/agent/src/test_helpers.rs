//! Scripted collaborators for tests of the loop and the workflow.
//!
//! Compiled for this crate's tests and, through the `test-helpers` feature,
//! for the dev-dependencies of downstream crates (workflow, cli) so they can
//! drive the whole pipeline without a network.

use pagepilot_core::error::ProviderError;
use pagepilot_core::message::{Message, MessageToolCall};
use pagepilot_core::plan::{Plan, PlanAction, PlanStep};
use pagepilot_core::provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolChoice, Usage,
};
use pagepilot_tools::{BrowserBackend, RetryingExecutor, ToolRetryConfig, browser_registry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One scripted model answer.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Reply {
        text: String,
        tool_calls: Vec<MessageToolCall>,
    },
    Fail(ProviderError),
}

impl ScriptedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Reply {
            text: text.into(),
            tool_calls: vec![],
        }
    }

    pub fn tools(tool_calls: Vec<MessageToolCall>) -> Self {
        Self::Reply {
            text: String::new(),
            tool_calls,
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::text(value.to_string())
    }

    pub fn error(error: ProviderError) -> Self {
        Self::Fail(error)
    }
}

/// A provider that answers from a queue, one turn per call.
///
/// `complete` and `stream` share the queue. An exhausted script fails with
/// an API error so a test never hangs on a missing turn.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Tool choice of every request that offered tools.
    pub fn tool_choices(&self) -> Vec<ToolChoice> {
        self.requests()
            .iter()
            .filter(|r| !r.tools.is_empty())
            .map(|r| r.tool_choice)
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next(&self, request: ProviderRequest) -> Result<(String, Vec<MessageToolCall>), ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let turn = self.turns.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match turn {
            Some(ScriptedTurn::Reply { text, tool_calls }) => Ok((text, tool_calls)),
            Some(ScriptedTurn::Fail(e)) => Err(e),
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: "scripted provider has no turns left".into(),
            }),
        }
    }
}

fn scripted_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        let (text, tool_calls) = self.next(request)?;
        Ok(ProviderResponse {
            message: Message::assistant_with_tools(text, tool_calls),
            usage: Some(scripted_usage()),
            model,
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let (text, tool_calls) = self.next(request)?;
        let (tx, rx) = tokio::sync::mpsc::channel(4);

        // Text arrives word by word, tool calls in the final chunk
        let mut chunks: Vec<StreamChunk> = text
            .split_inclusive(' ')
            .map(|piece| StreamChunk {
                content: Some(piece.to_string()),
                ..Default::default()
            })
            .collect();
        chunks.push(StreamChunk {
            tool_calls,
            done: true,
            usage: Some(scripted_usage()),
            ..Default::default()
        });

        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// A tool call as the model would emit it.
pub fn tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{}_{}", name, uuid::Uuid::new_v4().simple()),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// The browser tool set behind a fast-retrying executor.
pub fn browser_executor(browser: Arc<dyn BrowserBackend>) -> Arc<RetryingExecutor> {
    let config = ToolRetryConfig {
        retry_delay: std::time::Duration::from_millis(1),
        max_retry_delay: std::time::Duration::from_millis(4),
        ..ToolRetryConfig::default()
    };
    Arc::new(RetryingExecutor::new(browser_registry(browser), config))
}

/// A small valid plan: open a page, then read it.
pub fn single_step_plan() -> Plan {
    Plan {
        objective: "Read the title of example.com".into(),
        approach: "Open the page and read its context".into(),
        steps: vec![
            PlanStep {
                step: 1,
                action: PlanAction::Navigate,
                target: "https://example.com".into(),
                reasoning: "The page must be open before it can be read".into(),
                expected_outcome: "example.com is loaded".into(),
                validation_criteria: None,
                fallback_action: None,
            },
            PlanStep::page_context(2),
        ],
        critical_paths: vec![1],
        estimated_steps: 2,
        complexity_score: 0.2,
        confidence: 0.9,
        potential_issues: vec![],
        optimizations: vec![],
    }
}
