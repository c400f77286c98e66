//! # PagePilot Core
//!
//! Domain types, capability traits, and error definitions for the PagePilot
//! browser agent. Nothing in here talks to a network or a browser: the
//! language model, the browser tools, the approval prompt and the search
//! backend are all capabilities defined as traits and implemented elsewhere.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates, which keeps the workflow crates testable with scripted
//! mocks and lets the binary decide which concrete capabilities to wire.

pub mod approval;
pub mod error;
pub mod event;
pub mod message;
pub mod plan;
pub mod provider;
pub mod search;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use approval::{ApprovalDecision, ApprovalRequest, Approver, AutoApprove};
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use plan::{FallbackAction, Plan, PlanAction, PlanError, PlanStep};
pub use provider::{
    Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk, ToolChoice,
    ToolDefinition, Usage,
};
pub use search::{SearchHit, WebSearch};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
