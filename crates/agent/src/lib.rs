//! The execution loop, where the agent actually drives the browser.
//!
//! One run of [`ExecutionLoop`] is a streaming conversation with the model:
//!
//! 1. **Send** the conversation plus the browser tool definitions
//! 2. **Stream** the reply, forwarding text deltas as [`AgentStreamEvent`]s
//! 3. **If tool calls**: gate sensitive ones through the [`ApprovalGate`],
//!    execute them with tool-level retry, append the results, loop back to 2
//! 4. **If text only**: finish
//!
//! The loop also stops on the step budget, a streak of tool errors, a
//! navigation loop, or cancellation.

pub mod approval;
pub mod execution;
pub mod guard;
pub mod intent;
pub mod loop_runner;
pub mod stream_event;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use approval::{ApprovalGate, REJECTED_ERROR};
pub use execution::{ExecutionResult, ExecutionStep, FinishReason, ToolExecution, ToolExecutionState};
pub use guard::{ErrorStreak, NavigationLoopDetector};
pub use intent::expected_tool_for_intent;
pub use loop_runner::{ExecutionLoop, LoopConfig, fallback_text};
pub use stream_event::AgentStreamEvent;
