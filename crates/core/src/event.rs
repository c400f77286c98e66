//! Domain event system: workflow progress for observers.
//!
//! Events are published when a phase starts or ends, a tool runs, an approval
//! is decided, or a retry is scheduled. Nothing in the control loop reads
//! them back; they exist for UIs and logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    PhaseStarted {
        workflow_id: String,
        phase: String,
        timestamp: DateTime<Utc>,
    },

    PhaseCompleted {
        workflow_id: String,
        phase: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (after tool-level retries)
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    ApprovalDecided {
        tool_name: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    /// The evaluator asked for another execution attempt
    RetryScheduled {
        workflow_id: String,
        attempt: u32,
        max_retries: u32,
        issues: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A phase substituted a locally computed value for a failed model call
    FallbackUsed {
        phase: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
