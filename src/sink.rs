//! Log sink — external durable store for task-lifecycle and metrics records.
//!
//! The engine writes fire-and-forget: create/start/complete/fail records
//! keyed by task id, and periodic worker-metrics snapshots. It reads the
//! sink at runtime only as a fallback for status queries that miss the
//! in-memory maps.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SinkError;
use crate::metrics::MetricsSnapshot;
use crate::task::{Priority, TaskRecord, TaskStatus};

/// Lifecycle record written to the sink. Carries the minimum fields needed
/// to reconstruct a task snapshot from durable storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogRecord {
    pub task_id: Uuid,
    pub task_type: String,
    pub owner_id: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl From<&TaskRecord> for TaskLogRecord {
    fn from(task: &TaskRecord) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            owner_id: task.owner_id.clone(),
            priority: task.priority,
            status: task.status,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            error_message: task.error_message.clone(),
            result: task.result.clone(),
        }
    }
}

impl TaskLogRecord {
    /// Rebuild a status snapshot from a durable record. Payload, callback
    /// and tags are not round-tripped; this exists for status queries that
    /// outlive the in-memory retention windows.
    pub fn into_task_record(self) -> TaskRecord {
        TaskRecord {
            id: self.task_id,
            task_type: self.task_type,
            payload: serde_json::Value::Null,
            priority: self.priority,
            owner_id: self.owner_id,
            status: self.status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            timeout_secs: 0,
            result: self.result,
            error_message: self.error_message,
            callback_target: None,
            dependencies: Vec::new(),
            tags: Vec::new(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Append-only durability interface, implemented by the embedding
/// application.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Append a task-lifecycle record.
    async fn record_task(&self, record: TaskLogRecord) -> Result<(), SinkError>;

    /// Append a system-metrics snapshot.
    async fn record_metrics(&self, snapshot: MetricsSnapshot) -> Result<(), SinkError>;

    /// Latest record for a task id, if the sink has one.
    async fn fetch_task(&self, id: Uuid) -> Result<Option<TaskLogRecord>, SinkError>;
}

/// In-memory sink keeping the latest record per task. Good enough for
/// tests and single-process demos; real durability is the embedder's job.
#[derive(Default)]
pub struct MemorySink {
    tasks: RwLock<HashMap<Uuid, TaskLogRecord>>,
    metrics: RwLock<Vec<MetricsSnapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of metrics snapshots flushed so far.
    pub async fn metrics_count(&self) -> usize {
        self.metrics.read().await.len()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn record_task(&self, record: TaskLogRecord) -> Result<(), SinkError> {
        self.tasks.write().await.insert(record.task_id, record);
        Ok(())
    }

    async fn record_metrics(&self, snapshot: MetricsSnapshot) -> Result<(), SinkError> {
        self.metrics.write().await.push(snapshot);
        Ok(())
    }

    async fn fetch_task(&self, id: Uuid) -> Result<Option<TaskLogRecord>, SinkError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }
}

/// Sink that drops everything. Useful when the embedder wants no
/// durability at all.
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn record_task(&self, _record: TaskLogRecord) -> Result<(), SinkError> {
        Ok(())
    }

    async fn record_metrics(&self, _snapshot: MetricsSnapshot) -> Result<(), SinkError> {
        Ok(())
    }

    async fn fetch_task(&self, _id: Uuid) -> Result<Option<TaskLogRecord>, SinkError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;

    #[tokio::test]
    async fn memory_sink_keeps_latest_record() {
        let sink = MemorySink::new();
        let mut task = TaskRecord::new(NewTask::new("noop", serde_json::json!({})), 3);

        sink.record_task((&task).into()).await.unwrap();
        task.transition_to(TaskStatus::Processing).unwrap();
        task.transition_to(TaskStatus::Completed).unwrap();
        sink.record_task((&task).into()).await.unwrap();

        let fetched = sink.fetch_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn log_record_round_trip_fields() {
        let mut task = TaskRecord::new(
            NewTask::new("parse", serde_json::json!({"doc": 1}))
                .owner("acct-7")
                .priority(Priority::High),
            3,
        );
        task.retry_count = 2;
        task.error_message = Some("boom".to_string());

        let record = TaskLogRecord::from(&task);
        let rebuilt = record.into_task_record();
        assert_eq!(rebuilt.id, task.id);
        assert_eq!(rebuilt.task_type, "parse");
        assert_eq!(rebuilt.owner_id, "acct-7");
        assert_eq!(rebuilt.priority, Priority::High);
        assert_eq!(rebuilt.retry_count, 2);
        assert_eq!(rebuilt.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn noop_sink_never_finds_tasks() {
        let sink = NoopSink;
        assert!(sink.fetch_task(Uuid::new_v4()).await.unwrap().is_none());
    }
}
