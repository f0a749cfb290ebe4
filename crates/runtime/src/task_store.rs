//! In-memory task table using DashMap for concurrent access
//!
//! Every state transition happens under the task's map entry lock, so a
//! claim for dispatch is atomic with respect to concurrent submissions of the
//! same task id.

use coproc_consensus::TaskId;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Recorded, not yet sent to the gateway
    Submitted,
    /// Gateway call in flight
    Dispatched,
    /// Result recorded
    Completed,
    /// Gateway call failed or timed out
    Failed,
}

/// A tracked task
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    /// Encrypted payload (opaque)
    pub payload: String,
    pub state: TaskState,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Task id reported (or synthesized) by the gateway, informational only
    pub gateway_task_id: Option<String>,
    pub submitted_at: i64,
    pub finished_at: Option<i64>,
}

impl Task {
    fn new(id: TaskId, payload: String, now: i64) -> Self {
        Self {
            id,
            payload,
            state: TaskState::Submitted,
            result: None,
            error: None,
            gateway_task_id: None,
            submitted_at: now,
            finished_at: None,
        }
    }
}

/// Read-only view of a task's outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub found: bool,
    pub state: Option<TaskState>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskResult {
    /// Wire status: unknown and in-flight tasks both report "pending"
    pub fn status(&self) -> &'static str {
        match self.state {
            Some(TaskState::Completed) => "completed",
            Some(TaskState::Failed) => "failed",
            _ => "pending",
        }
    }
}

/// Generate a task id from a payload and a unix timestamp
pub fn generate_task_id(payload: &str, unix_secs: i64) -> TaskId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(payload.as_bytes());
    hasher.update(unix_secs.to_string().as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// Thread-safe task table
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<DashMap<TaskId, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submission, returning the task's state afterwards
    ///
    /// Resubmitting a Submitted, Dispatched or Completed task changes nothing.
    /// Resubmitting a Failed task resets it to Submitted with the new payload.
    pub fn submit(&self, task_id: &str, payload: String, now: i64) -> TaskState {
        match self.tasks.entry(task_id.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(Task::new(task_id.to_string(), payload, now));
                TaskState::Submitted
            }
            Entry::Occupied(mut entry) => {
                let task = entry.get_mut();
                if task.state == TaskState::Failed {
                    tracing::info!("Resubmitting failed task {}", task_id);
                    *task = Task::new(task_id.to_string(), payload, now);
                }
                task.state
            }
        }
    }

    /// Move a task Submitted -> Dispatched, returning its payload
    ///
    /// Returns `None` if the task is unknown or has already been claimed.
    pub fn claim_dispatch(&self, task_id: &str) -> Option<String> {
        let mut task = self.tasks.get_mut(task_id)?;
        if task.state != TaskState::Submitted {
            return None;
        }
        task.state = TaskState::Dispatched;
        Some(task.payload.clone())
    }

    /// Move a task Dispatched -> Completed with its result
    pub fn complete(
        &self,
        task_id: &str,
        result: String,
        gateway_task_id: Option<String>,
        now: i64,
    ) -> bool {
        self.finish(task_id, now, |task| {
            task.state = TaskState::Completed;
            task.result = Some(result);
            task.gateway_task_id = gateway_task_id;
        })
    }

    /// Move a task Dispatched -> Failed
    pub fn fail(&self, task_id: &str, error: String, now: i64) -> bool {
        self.finish(task_id, now, |task| {
            task.state = TaskState::Failed;
            task.error = Some(error);
        })
    }

    fn finish(&self, task_id: &str, now: i64, apply: impl FnOnce(&mut Task)) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(mut task) if task.state == TaskState::Dispatched => {
                apply(task.value_mut());
                task.finished_at = Some(now);
                true
            }
            Some(task) => {
                tracing::warn!(
                    "Ignoring completion for task {} in state {:?}",
                    task_id,
                    task.state
                );
                false
            }
            None => false,
        }
    }

    /// Get a copy of a task
    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|r| r.value().clone())
    }

    /// Outcome view for a task (never blocks on dispatch)
    pub fn result(&self, task_id: &str) -> TaskResult {
        match self.tasks.get(task_id) {
            Some(task) => TaskResult {
                task_id: task_id.to_string(),
                found: true,
                state: Some(task.state),
                result: task.result.clone(),
                error: task.error.clone(),
            },
            None => TaskResult {
                task_id: task_id.to_string(),
                found: false,
                state: None,
                result: None,
                error: None,
            },
        }
    }

    /// Number of tasks in a given state
    pub fn count_in_state(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|r| r.value().state == state).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
