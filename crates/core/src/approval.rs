//! Approval capability: an external yes/no decision before a sensitive
//! tool call runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the approver is asked to confirm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,

    /// Why the call was flagged as sensitive
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }
}

/// Asks a human (or a policy) to confirm a tool call.
///
/// Implementations must not panic on timeout; a timed-out request should be
/// reported as `Rejected`.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Approves everything. Used by `--auto-approve` and in tests.
pub struct AutoApprove;

#[async_trait]
impl Approver for AutoApprove {
    async fn request_approval(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approved
    }
}
