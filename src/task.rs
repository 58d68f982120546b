//! Task model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority level of a task. Lower priorities can be starved indefinitely
/// by a sustained stream of higher-priority work; there is no aging or
/// promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// All levels in strict dequeue-precedence order.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for a worker.
    Pending,
    /// Claimed by a worker; the handler is running.
    Processing,
    /// Handler succeeded; result stored.
    Completed,
    /// Retries exhausted; error message stored.
    Failed,
    /// Cancelled before reaching a terminal outcome.
    Cancelled,
    /// Handler failed; waiting out the backoff delay before re-enqueue.
    Retrying,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // From Pending
            (Pending, Processing) | (Pending, Cancelled) |
            // From Processing
            (Processing, Completed) | (Processing, Retrying) |
            (Processing, Failed) | (Processing, Cancelled) |
            // From Retrying (back into the queue after backoff)
            (Retrying, Pending) | (Retrying, Cancelled)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the task is still tracked by the engine (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        };
        write!(f, "{s}")
    }
}

/// A unit of work flowing through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task ID, assigned at creation.
    pub id: Uuid,
    /// Handler-registry key.
    pub task_type: String,
    /// Opaque payload passed to the handler.
    pub payload: serde_json::Value,
    /// Priority, immutable after creation.
    pub priority: Priority,
    /// Requester, for attribution in logs.
    pub owner_id: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Retry limit; `retry_count > max_retries` is terminal failure.
    pub max_retries: u32,
    /// Per-task handler deadline in seconds; 0 disables the deadline.
    pub timeout_secs: u64,
    /// Success payload, set only when status is `Completed`.
    pub result: Option<serde_json::Value>,
    /// Set when a handler fails or retries are exhausted.
    pub error_message: Option<String>,
    /// Optional endpoint notified on terminal state.
    pub callback_target: Option<String>,
    /// Declared prerequisite task ids. Carried for observability; the
    /// dequeue loop does not enforce them.
    pub dependencies: Vec<Uuid>,
    /// Free-form labels for observability.
    pub tags: Vec<String>,
    /// Creation time; FIFO tie-break key within a priority queue.
    pub created_at: DateTime<Utc>,
    /// First dequeue time.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Build a pending record from a submission.
    pub fn new(spec: NewTask, default_max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: spec.task_type,
            payload: spec.payload,
            priority: spec.priority,
            owner_id: spec.owner_id,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            timeout_secs: spec.timeout_secs.unwrap_or(0),
            result: None,
            error_message: None,
            callback_target: spec.callback_target,
            dependencies: spec.dependencies,
            tags: spec.tags,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to a new status, rejecting illegal transitions.
    pub fn transition_to(&mut self, target: TaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "task {} cannot transition from {} to {}",
                self.id, self.status, target
            ));
        }
        self.status = target;
        match target {
            TaskStatus::Processing => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }
}

/// Task submission. Only the type, payload, owner and priority are
/// required; everything else falls back to engine defaults.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub owner_id: String,
    pub priority: Priority,
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub callback_target: Option<String>,
    pub dependencies: Vec<Uuid>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            owner_id: "default".to_string(),
            priority: Priority::Medium,
            max_retries: None,
            timeout_secs: None,
            callback_target: None,
            dependencies: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn callback(mut self, target: impl Into<String>) -> Self {
        self.callback_target = Some(target.into());
        self
    }

    pub fn depends_on(mut self, id: Uuid) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new(NewTask::new("noop", serde_json::json!({})), 3)
    }

    #[test]
    fn happy_path_transitions() {
        let mut task = record();
        assert_eq!(task.status, TaskStatus::Pending);
        task.transition_to(TaskStatus::Processing).unwrap();
        assert!(task.started_at.is_some());
        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.status.is_terminal());
    }

    #[test]
    fn retry_cycle_transitions() {
        let mut task = record();
        task.transition_to(TaskStatus::Processing).unwrap();
        task.transition_to(TaskStatus::Retrying).unwrap();
        task.transition_to(TaskStatus::Pending).unwrap();
        task.transition_to(TaskStatus::Processing).unwrap();
        task.transition_to(TaskStatus::Failed).unwrap();
    }

    #[test]
    fn terminal_statuses_reject_further_transitions() {
        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            for target in [
                TaskStatus::Pending,
                TaskStatus::Processing,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn cancel_only_from_pending_processing_retrying() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Retrying.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn submission_defaults() {
        let task = record();
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.timeout_secs, 0);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.result.is_none());
        assert!(task.error_message.is_none());
    }

    #[test]
    fn priority_precedence_order() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::ALL[0], Priority::Critical);
        assert_eq!(Priority::ALL[3], Priority::Low);
    }
}
