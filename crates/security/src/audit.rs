//! Audit logging: a record of every approval decision.
//!
//! The execution loop records when a sensitive call was flagged and what
//! the approver decided, so a run can be reviewed afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,

    /// Tool call id the entry refers to
    pub call_id: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A call was flagged and sent to the approver
    ApprovalRequested { tool_name: String },
    /// The approver answered
    ApprovalDecided { tool_name: String },
    /// A sensitive call ran because no approver was configured
    UngatedSensitiveCall { tool_name: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Pending,
    Approved,
    Denied,
}

/// Trait for audit log sinks (where entries are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// In-memory audit log with optional forwarding sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Record an audit event.
    pub fn log(&self, event: AuditEvent, call_id: &str, outcome: AuditOutcome, details: Option<String>) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            call_id: call_id.into(),
            outcome,
            details,
        };

        for sink in &self.sinks {
            sink.record(&entry);
        }
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    pub fn entries_by_outcome(&self, outcome: AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    // A panicking sink must not make the log unusable
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Forwards entries to `tracing` at info level.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            call_id = %entry.call_id,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn requested(tool: &str) -> AuditEvent {
        AuditEvent::ApprovalRequested {
            tool_name: tool.into(),
        }
    }

    #[test]
    fn log_and_filter() {
        let logger = AuditLogger::new();
        logger.log(requested("navigate"), "c1", AuditOutcome::Pending, None);
        logger.log(
            AuditEvent::ApprovalDecided {
                tool_name: "navigate".into(),
            },
            "c1",
            AuditOutcome::Denied,
            Some("user said no".into()),
        );

        assert_eq!(logger.count(), 2);
        let denied = logger.entries_by_outcome(AuditOutcome::Denied);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].details.as_deref(), Some("user said no"));
    }

    #[test]
    fn entry_serialization() {
        let logger = AuditLogger::new();
        logger.log(requested("type_text"), "c9", AuditOutcome::Pending, None);
        let json = serde_json::to_string(&logger.entries()[0]).unwrap();
        assert!(json.contains(r#""type":"approval_requested""#));
        assert!(json.contains(r#""outcome":"pending""#));
    }

    #[test]
    fn custom_sink_receives_entries() {
        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.call_id.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink {
            received: received.clone(),
        })]);
        logger.log(requested("navigate"), "c1", AuditOutcome::Pending, None);

        assert_eq!(*received.lock().unwrap(), vec!["c1".to_string()]);
    }

    #[test]
    fn debug_format() {
        let debug_str = format!("{:?}", AuditLogger::default());
        assert!(debug_str.contains("entry_count"));
    }
}
