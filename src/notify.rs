//! Outcome notifications — broadcast events and optional HTTP callbacks.
//!
//! Both paths are fire-and-forget: a lagging subscriber or an unreachable
//! callback target never blocks or fails task processing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{TaskRecord, TaskStatus};

/// Event published when a task reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskEvent {
    /// Build the terminal event for a task record.
    pub fn terminal(task: &TaskRecord) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            result: task.result.clone(),
            error: task.error_message.clone(),
        }
    }
}

/// Posts terminal-state notifications to a task's `callback_target`.
/// Delivery failure is logged, not retried.
pub struct CallbackInvoker {
    client: reqwest::Client,
}

impl CallbackInvoker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// POST the event as JSON to the target.
    pub async fn notify(&self, target: &str, event: &TaskEvent) {
        match self.client.post(target).json(event).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(task_id = %event.task_id, target = %target, "Callback delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    task_id = %event.task_id,
                    target = %target,
                    status = %response.status(),
                    "Callback target rejected notification"
                );
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %event.task_id,
                    target = %target,
                    error = %e,
                    "Callback delivery failed"
                );
            }
        }
    }
}

impl Default for CallbackInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;

    #[test]
    fn terminal_event_carries_result_or_error() {
        let mut task = TaskRecord::new(NewTask::new("noop", serde_json::json!({})), 3);
        task.transition_to(TaskStatus::Processing).unwrap();
        task.result = Some(serde_json::json!({"ok": true}));
        task.transition_to(TaskStatus::Completed).unwrap();

        let event = TaskEvent::terminal(&task);
        assert_eq!(event.status, TaskStatus::Completed);
        assert!(event.result.is_some());
        assert!(event.error.is_none());
    }
}
