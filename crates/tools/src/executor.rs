//! Tool-level retry: per-kind timeouts and bounded exponential backoff.
//!
//! This sits between the execution loop and the [`ToolRegistry`]. It is
//! independent of the workflow-level retry driven by the evaluator: a click
//! that hits a dropped content-script connection is retried here, silently,
//! before the model ever sees a failure.

use pagepilot_config::ToolsConfig;
use pagepilot_core::error::ToolError;
use pagepilot_core::provider::ToolDefinition;
use pagepilot_core::tool::{ToolCall, ToolRegistry, ToolResult};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timeout class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Navigation,
    Screenshot,
    Interaction,
    Keypress,
    Wait,
}

impl ToolKind {
    pub fn classify(tool_name: &str) -> Self {
        match tool_name {
            "navigate" => ToolKind::Navigation,
            "screenshot" => ToolKind::Screenshot,
            "press_key" => ToolKind::Keypress,
            "wait" => ToolKind::Wait,
            _ => ToolKind::Interaction,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolRetryConfig {
    pub navigation_timeout: Duration,
    pub screenshot_timeout: Duration,
    pub interaction_timeout: Duration,
    pub keypress_timeout: Duration,
    pub wait_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl ToolRetryConfig {
    pub fn timeout_for(&self, kind: ToolKind) -> Duration {
        match kind {
            ToolKind::Navigation => self.navigation_timeout,
            ToolKind::Screenshot => self.screenshot_timeout,
            ToolKind::Interaction => self.interaction_timeout,
            ToolKind::Keypress => self.keypress_timeout,
            ToolKind::Wait => self.wait_timeout,
        }
    }

    /// Delay before attempt `attempt + 1`: `retry_delay * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

impl From<&ToolsConfig> for ToolRetryConfig {
    fn from(config: &ToolsConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            screenshot_timeout: Duration::from_millis(config.screenshot_timeout_ms),
            interaction_timeout: Duration::from_millis(config.interaction_timeout_ms),
            keypress_timeout: Duration::from_millis(config.keypress_timeout_ms),
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_retry_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }
}

impl Default for ToolRetryConfig {
    fn default() -> Self {
        Self::from(&ToolsConfig::default())
    }
}

/// The result of one logical tool call, after retries.
#[derive(Debug)]
pub struct ToolOutcome {
    pub result: Result<ToolResult, ToolError>,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Executes tool calls with timeouts and transient-failure retry.
#[derive(Debug, Clone)]
pub struct RetryingExecutor {
    registry: ToolRegistry,
    config: ToolRetryConfig,
}

impl RetryingExecutor {
    pub fn new(registry: ToolRegistry, config: ToolRetryConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ToolRetryConfig {
        &self.config
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Run a tool call. Only transient errors are retried; a result with
    /// `success: false` is a normal outcome and is returned as-is.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let timeout = self.config.timeout_for(ToolKind::classify(&call.name));
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, self.registry.execute(call)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        tool = %call.name,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient tool failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => {
                    debug!(tool = %call.name, attempt, ok = result.is_ok(), "Tool call finished");
                    return ToolOutcome {
                        result,
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                    };
                }
            }
        }
    }
}
