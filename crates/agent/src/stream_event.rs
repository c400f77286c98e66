//! Agent-level streaming events.
//!
//! `AgentStreamEvent` wraps provider stream chunks and tool outcomes into
//! higher-level events that a UI (or the workflow's event bridge) consumes
//! while the loop runs.

use pagepilot_core::provider::Usage;
use serde::{Deserialize, Serialize};

use crate::execution::FinishReason;

/// Events emitted by the execution loop.
///
/// - `text_delta`         partial text from the model
/// - `tool_call`          the model asked for a tool
/// - `approval_requested` a sensitive call is waiting for a decision
/// - `approval_resolved`  the decision arrived
/// - `tool_result`        a tool call finished (or was rejected)
/// - `step_finish`        one model step is complete
/// - `finish`             the loop stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    TextDelta { text: String },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ApprovalRequested {
        id: String,
        name: String,
        input: serde_json::Value,
        reason: String,
    },

    ApprovalResolved {
        id: String,
        name: String,
        approved: bool,
    },

    ToolResult {
        id: String,
        name: String,
        output: serde_json::Value,
        success: bool,
        duration_ms: u64,
        attempts: u32,
    },

    StepFinish {
        step: u32,
        tool_calls: usize,
        usage: Option<Usage>,
    },

    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        steps: u32,
    },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ApprovalResolved { .. } => "approval_resolved",
            Self::ToolResult { .. } => "tool_result",
            Self::StepFinish { .. } => "step_finish",
            Self::Finish { .. } => "finish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_serialization() {
        let event = AgentStreamEvent::TextDelta {
            text: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"text_delta""#));
        assert!(json.contains(r#""text":"Hello""#));
    }

    #[test]
    fn finish_serialization() {
        let event = AgentStreamEvent::Finish {
            finish_reason: FinishReason::NavigationLoop,
            usage: Usage::default(),
            steps: 4,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""finish_reason":"navigation_loop""#));
        assert_eq!(event.event_type(), "finish");
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"approval_resolved","id":"c1","name":"navigate","approved":false}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, AgentStreamEvent::ApprovalResolved { approved: false, .. }));
    }
}
