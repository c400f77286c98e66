//! Security for PagePilot: the approval policy and the approval audit log.
//!
//! Provides:
//! - **Approval policy**: which tool calls must be confirmed before they run
//! - **Audit logging**: what was flagged and what the approver decided

pub mod audit;
pub mod policy;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use policy::{ApprovalPolicy, Sensitivity};
