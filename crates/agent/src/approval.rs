//! Approval gate: the workflow-layer wrapper that pauses sensitive calls.
//!
//! The gate combines the [`ApprovalPolicy`] (is this call sensitive?) with
//! an optional [`Approver`] (what does the human say?). Without an
//! approver, sensitive calls run ungated and the audit log says so.

use pagepilot_config::ApprovalConfig;
use pagepilot_core::approval::{ApprovalDecision, ApprovalRequest, Approver};
use pagepilot_core::tool::ToolCall;
use pagepilot_security::{ApprovalPolicy, AuditEvent, AuditLogger, AuditOutcome, Sensitivity};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Text of the synthetic result for a rejected call.
pub const REJECTED_ERROR: &str = "cancelled by user";

pub struct ApprovalGate {
    policy: ApprovalPolicy,
    approver: Option<Arc<dyn Approver>>,
    audit: Arc<AuditLogger>,
    timeout: Option<Duration>,
}

impl ApprovalGate {
    pub fn new(policy: ApprovalPolicy, approver: Option<Arc<dyn Approver>>) -> Self {
        Self {
            policy,
            approver,
            audit: Arc::new(AuditLogger::new()),
            timeout: None,
        }
    }

    /// Gate built from the `[approval]` section: its policy, plus its
    /// decision timeout unless `timeout_secs` is 0.
    pub fn from_config(config: &ApprovalConfig, approver: Option<Arc<dyn Approver>>) -> Self {
        let gate = Self::new(ApprovalPolicy::new(config), approver);
        match config.timeout_secs {
            0 => gate,
            secs => gate.with_timeout(Duration::from_secs(secs)),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Treat an unanswered request as rejected after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Classify a call. Returns the reason when the approver must be asked.
    pub fn check(&self, call: &ToolCall) -> Option<String> {
        match self.policy.check(&call.name, &call.arguments) {
            Sensitivity::Safe => None,
            Sensitivity::NeedsApproval { reason } => {
                if self.approver.is_none() {
                    warn!(tool = %call.name, reason = %reason, "Sensitive call running without an approver");
                    self.audit.log(
                        AuditEvent::UngatedSensitiveCall {
                            tool_name: call.name.clone(),
                        },
                        &call.id,
                        AuditOutcome::Approved,
                        Some(reason),
                    );
                    return None;
                }
                Some(reason)
            }
        }
    }

    /// Ask the approver. Only called after [`check`](Self::check) returned a reason.
    pub async fn request(&self, call: &ToolCall, reason: &str) -> ApprovalDecision {
        let Some(approver) = &self.approver else {
            return ApprovalDecision::Approved;
        };

        self.audit.log(
            AuditEvent::ApprovalRequested {
                tool_name: call.name.clone(),
            },
            &call.id,
            AuditOutcome::Pending,
            Some(reason.to_string()),
        );

        let request = ApprovalRequest {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            reason: reason.to_string(),
        };

        let decision = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, approver.request_approval(&request))
                .await
                .unwrap_or_else(|_| ApprovalDecision::Rejected {
                    reason: Some(format!("no decision within {}s", limit.as_secs())),
                }),
            None => approver.request_approval(&request).await,
        };

        let (outcome, details) = match &decision {
            ApprovalDecision::Approved => (AuditOutcome::Approved, None),
            ApprovalDecision::Rejected { reason } => (AuditOutcome::Denied, reason.clone()),
        };
        info!(tool = %call.name, call_id = %call.id, approved = decision.is_approved(), "Approval decided");
        self.audit.log(
            AuditEvent::ApprovalDecided {
                tool_name: call.name.clone(),
            },
            &call.id,
            outcome,
            details,
        );

        decision
    }
}
