//! Task ledger: status bookkeeping for the five workflow phases.
//!
//! The ledger observes the run, it never drives it. Every mutation notifies
//! the subscribed listeners synchronously, after the internal lock is
//! released, so a listener may read the ledger back.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// The fixed set of workflow tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskId {
    Plan,
    Context,
    Execute,
    Evaluate,
    Summarize,
}

impl TaskId {
    pub const ALL: [TaskId; 5] = [
        TaskId::Plan,
        TaskId::Context,
        TaskId::Execute,
        TaskId::Evaluate,
        TaskId::Summarize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskId::Plan => "plan",
            TaskId::Context => "context",
            TaskId::Execute => "execute",
            TaskId::Evaluate => "evaluate",
            TaskId::Summarize => "summarize",
        }
    }

    fn default_title(&self) -> &'static str {
        match self {
            TaskId::Plan => "Plan the task",
            TaskId::Context => "Gather page context",
            TaskId::Execute => "Execute browser actions",
            TaskId::Evaluate => "Evaluate the result",
            TaskId::Summarize => "Summarize the outcome",
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Error,
    Cancelled,
    /// Re-running after an evaluation asked for a retry
    Retrying,
}

impl TaskStatus {
    /// The status observers see. `Retrying` is reported as `InProgress`.
    pub fn observed(&self) -> TaskStatus {
        match self {
            TaskStatus::Retrying => TaskStatus::InProgress,
            other => *other,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Retrying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// What listeners receive on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskUpdate {
    pub id: TaskId,
    pub status: TaskStatus,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("cannot start {task}: {limit} task(s) already in progress")]
    ConcurrencyLimit { task: TaskId, limit: usize },
}

pub type TaskListener = Arc<dyn Fn(&TaskUpdate) + Send + Sync>;

pub struct TaskLedger {
    tasks: Mutex<Vec<Task>>,
    listeners: Mutex<Vec<TaskListener>>,
    concurrency: usize,
}

impl TaskLedger {
    /// An empty ledger allowing `concurrency` active tasks at once.
    pub fn new(concurrency: usize) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            concurrency: concurrency.max(1),
        }
    }

    /// A ledger holding the five workflow tasks, all `Pending`.
    pub fn standard(concurrency: usize) -> Self {
        let ledger = Self::new(concurrency);
        {
            let mut tasks = ledger.lock_tasks();
            for id in TaskId::ALL {
                tasks.push(Task {
                    id,
                    title: id.default_title().to_string(),
                    status: TaskStatus::Pending,
                    description: None,
                });
            }
        }
        ledger
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, listener: impl Fn(&TaskUpdate) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    fn notify(&self, update: TaskUpdate) {
        debug!(task = %update.id, status = ?update.status, "Task status changed");
        let listeners: Vec<TaskListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(&update);
        }
    }

    pub fn create(&self, id: TaskId, title: impl Into<String>) -> Result<(), LedgerError> {
        {
            let mut tasks = self.lock_tasks();
            if tasks.iter().any(|t| t.id == id) {
                return Err(LedgerError::DuplicateTask(id));
            }
            tasks.push(Task {
                id,
                title: title.into(),
                status: TaskStatus::Pending,
                description: None,
            });
        }
        self.notify(TaskUpdate {
            id,
            status: TaskStatus::Pending,
            description: None,
        });
        Ok(())
    }

    fn transition(
        &self,
        id: TaskId,
        status: TaskStatus,
        description: Option<String>,
    ) -> Result<(), LedgerError> {
        let update = {
            let mut tasks = self.lock_tasks();

            if status.is_active() {
                let active = tasks
                    .iter()
                    .filter(|t| t.id != id && t.status.is_active())
                    .count();
                if active >= self.concurrency {
                    return Err(LedgerError::ConcurrencyLimit {
                        task: id,
                        limit: self.concurrency,
                    });
                }
            }

            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(LedgerError::UnknownTask(id))?;
            task.status = status;
            if description.is_some() {
                task.description = description;
            }
            TaskUpdate {
                id,
                status: status.observed(),
                description: task.description.clone(),
            }
        };
        self.notify(update);
        Ok(())
    }

    pub fn start(&self, id: TaskId) -> Result<(), LedgerError> {
        self.transition(id, TaskStatus::InProgress, None)
    }

    pub fn complete(&self, id: TaskId, note: Option<String>) -> Result<(), LedgerError> {
        self.transition(id, TaskStatus::Completed, note)
    }

    pub fn fail(&self, id: TaskId, note: impl Into<String>) -> Result<(), LedgerError> {
        self.transition(id, TaskStatus::Error, Some(note.into()))
    }

    pub fn cancel(&self, id: TaskId) -> Result<(), LedgerError> {
        self.transition(id, TaskStatus::Cancelled, None)
    }

    /// Put a task back to work after an evaluation asked for a retry.
    pub fn retry(&self, id: TaskId, note: Option<String>) -> Result<(), LedgerError> {
        self.transition(id, TaskStatus::Retrying, note)
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.lock_tasks().iter().find(|t| t.id == id).cloned()
    }

    /// All tasks in creation order.
    pub fn get_all(&self) -> Vec<Task> {
        self.lock_tasks().clone()
    }

    pub fn in_progress_count(&self) -> usize {
        self.lock_tasks().iter().filter(|t| t.status.is_active()).count()
    }

    /// Observer view of the ledger, with `retrying` reported as `in_progress`.
    pub fn snapshot_json(&self) -> serde_json::Value {
        let tasks: Vec<serde_json::Value> = self
            .lock_tasks()
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "title": t.title,
                    "status": t.status.observed(),
                    "description": t.description,
                })
            })
            .collect();
        serde_json::Value::Array(tasks)
    }
}

impl Default for TaskLedger {
    fn default() -> Self {
        Self::new(1)
    }
}
