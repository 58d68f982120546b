//! Engine façade — submission, status, cancellation and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, SubmitError, TaskError};
use crate::metrics::{MetricsCollector, MetricsSnapshot, WorkerStats};
use crate::notify::{CallbackInvoker, TaskEvent};
use crate::pool::worker::{WorkerHandle, spawn_worker};
use crate::pool::{health, scaler};
use crate::queue::{PriorityQueueSet, QueueDepths};
use crate::registry::HandlerRegistry;
use crate::retry::RetryCoordinator;
use crate::sink::{LogSink, TaskLogRecord};
use crate::task::{NewTask, TaskRecord, TaskStatus};

/// A task tracked in the active map: its record plus the handler-visible
/// cancellation flag.
pub(crate) struct ActiveTask {
    pub(crate) record: TaskRecord,
    pub(crate) cancelled: Arc<AtomicBool>,
}

/// Shared engine state. The queues, the active-task map and the worker
/// table are the only shared mutable structures; all three sit behind
/// short critical sections. Handler execution never holds any of them.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) registry: HandlerRegistry,
    pub(crate) queues: PriorityQueueSet,
    /// Pending, Processing and Retrying tasks.
    pub(crate) active: RwLock<HashMap<Uuid, ActiveTask>>,
    /// Terminal map for Completed and Cancelled records.
    pub(crate) completed: RwLock<HashMap<Uuid, TaskRecord>>,
    /// Terminal map for Failed records (longer retention window).
    pub(crate) failed: RwLock<HashMap<Uuid, TaskRecord>>,
    pub(crate) workers: RwLock<HashMap<Uuid, WorkerHandle>>,
    pub(crate) worker_tasks: RwLock<HashMap<Uuid, JoinHandle<()>>>,
    pub(crate) metrics: MetricsCollector,
    pub(crate) retry: RetryCoordinator,
    pub(crate) sink: Arc<dyn LogSink>,
    pub(crate) events: broadcast::Sender<TaskEvent>,
    pub(crate) callbacks: CallbackInvoker,
    pub(crate) shutdown: watch::Sender<bool>,
}

impl EngineInner {
    /// Fire-and-forget sink write for a lifecycle record.
    pub(crate) fn log_task_record(self: &Arc<Self>, record: TaskLogRecord) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.sink.record_task(record).await {
                tracing::warn!(error = %e, "Failed to write task record to sink");
            }
        });
    }

    /// Broadcast the terminal event and, when the task asked for one,
    /// deliver the callback notification.
    pub(crate) fn publish_terminal(self: &Arc<Self>, task: &TaskRecord) {
        let event = TaskEvent::terminal(task);

        // Broadcast — ok if no subscribers are listening
        let _ = self.events.send(event.clone());

        if let Some(target) = task.callback_target.clone() {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.callbacks.notify(&target, &event).await;
            });
        }
    }

    /// Finalize a task as Failed regardless of which non-terminal state it
    /// is in (retry exhaustion, or a re-enqueue that could not be placed).
    pub(crate) async fn fail_task_terminal(self: &Arc<Self>, task_id: Uuid, error: String) {
        let record = {
            let mut active = self.active.write().await;
            match active.remove(&task_id) {
                Some(mut entry) => {
                    entry.record.status = TaskStatus::Failed;
                    entry.record.error_message = Some(error.clone());
                    entry.record.completed_at = Some(Utc::now());
                    entry.record
                }
                None => {
                    tracing::debug!(task_id = %task_id, "Terminal failure for untracked task, ignoring");
                    return;
                }
            }
        };

        self.failed.write().await.insert(task_id, record.clone());
        self.metrics.record_terminal_failure().await;
        tracing::warn!(
            task_id = %task_id,
            task_type = %record.task_type,
            retry_count = record.retry_count,
            error = %error,
            "Task failed terminally"
        );
        self.log_task_record((&record).into());
        self.publish_terminal(&record);
    }

    /// Finalize a successful execution. A task cancelled mid-flight is no
    /// longer in the active map, so its late result is simply discarded.
    pub(crate) async fn complete_task(
        self: &Arc<Self>,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> bool {
        let record = {
            let mut active = self.active.write().await;
            match active.remove(&task_id) {
                Some(mut entry) => {
                    entry.record.result = Some(result);
                    if let Err(e) = entry.record.transition_to(TaskStatus::Completed) {
                        tracing::warn!(task_id = %task_id, error = %e, "Completion transition rejected");
                        return false;
                    }
                    entry.record
                }
                None => {
                    tracing::debug!(task_id = %task_id, "Discarding result of cancelled task");
                    return false;
                }
            }
        };

        self.completed.write().await.insert(task_id, record.clone());
        self.log_task_record((&record).into());
        self.publish_terminal(&record);
        true
    }

    /// Per-worker stats derived from cumulative counters, for snapshots.
    pub(crate) async fn worker_stats(&self) -> Vec<WorkerStats> {
        self.workers
            .read()
            .await
            .values()
            .map(|w| WorkerStats {
                worker_id: w.id,
                tasks_processed: w.tasks_processed,
                tasks_failed: w.tasks_failed,
                avg_processing_ms: if w.tasks_processed > 0 {
                    w.total_processing_ms as f64 / w.tasks_processed as f64
                } else {
                    0.0
                },
            })
            .collect()
    }
}

/// Read-only system snapshot: queue depths, worker states and task counts.
/// Never blocks on worker execution.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub queue_depths: QueueDepths,
    pub workers: Vec<WorkerHandle>,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub metrics: MetricsSnapshot,
}

/// Priority-aware task engine: bounded per-priority queues, a dynamically
/// sized worker pool, retry with exponential backoff, health-monitored
/// workers and aggregate metrics.
///
/// State is in-memory and best-effort: a crash loses queued and in-flight
/// tasks unless the embedding application replays from its log sink.
pub struct Engine {
    inner: Arc<EngineInner>,
    monitors: RwLock<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Create an engine with the given configuration and log sink. Workers
    /// do not run until [`Engine::start`]; tasks submitted before then sit
    /// queued.
    pub fn new(config: EngineConfig, sink: Arc<dyn LogSink>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(EngineInner {
            registry: HandlerRegistry::new(),
            queues: PriorityQueueSet::new(config.queue_capacities),
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            failed: RwLock::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
            worker_tasks: RwLock::new(HashMap::new()),
            metrics: MetricsCollector::new(),
            retry: RetryCoordinator::new(config.backoff_unit),
            sink,
            events,
            callbacks: CallbackInvoker::new(),
            shutdown,
            config,
        });
        Self {
            inner,
            monitors: RwLock::new(Vec::new()),
        }
    }

    /// Handler registry; register handlers before submitting their types.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Subscribe to terminal-state task events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Start the worker pool and the background monitors.
    pub async fn start(&self) {
        for _ in 0..self.inner.config.min_workers {
            spawn_worker(&self.inner, None).await;
        }

        let mut monitors = self.monitors.write().await;
        monitors.push(health::spawn_health_monitor(&self.inner));
        monitors.push(scaler::spawn_autoscaler(&self.inner));
        monitors.push(crate::metrics::spawn_metrics_loop(&self.inner));

        tracing::info!(
            engine = %self.inner.config.name,
            workers = self.inner.config.min_workers,
            max_workers = self.inner.config.max_workers,
            "Engine started"
        );
    }

    /// Validate, record and enqueue a task. Returns immediately with the
    /// task id; execution is asynchronous. Fails with `UnknownTaskType` or
    /// `QueueSaturated`; rejected tasks never enter a queue.
    pub async fn create_task(&self, spec: NewTask) -> Result<Uuid> {
        if !self.inner.registry.has(&spec.task_type).await {
            return Err(SubmitError::UnknownTaskType(spec.task_type).into());
        }

        let task = TaskRecord::new(spec, self.inner.config.default_max_retries);
        let id = task.id;
        let priority = task.priority;

        // Insert before enqueue so an immediate status query always sees
        // the task; roll back if the queue is saturated.
        self.inner.active.write().await.insert(
            id,
            ActiveTask {
                record: task.clone(),
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        );

        if let Err(e) = self.inner.queues.enqueue(priority, id).await {
            self.inner.active.write().await.remove(&id);
            return Err(e.into());
        }

        tracing::info!(
            task_id = %id,
            task_type = %task.task_type,
            priority = %priority,
            owner = %task.owner_id,
            "Task created"
        );
        self.inner.log_task_record((&task).into());
        Ok(id)
    }

    /// Snapshot of a task: active map, then terminal maps, then the sink.
    pub async fn task_status(&self, id: Uuid) -> Result<TaskRecord> {
        if let Some(entry) = self.inner.active.read().await.get(&id) {
            return Ok(entry.record.clone());
        }
        if let Some(record) = self.inner.completed.read().await.get(&id) {
            return Ok(record.clone());
        }
        if let Some(record) = self.inner.failed.read().await.get(&id) {
            return Ok(record.clone());
        }
        match self.inner.sink.fetch_task(id).await {
            Ok(Some(record)) => Ok(record.into_task_record()),
            Ok(None) => Err(TaskError::NotFound { id }.into()),
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Sink lookup failed during status query");
                Err(TaskError::NotFound { id }.into())
            }
        }
    }

    /// Cancel a task. Valid only while the task is in the active map; any
    /// other id is `InvalidState`. A handler already running is not
    /// interrupted — it sees the cooperative flag, and a late result is
    /// discarded.
    pub async fn cancel_task(&self, id: Uuid) -> Result<()> {
        let entry = self.inner.active.write().await.remove(&id);

        let Some(mut entry) = entry else {
            // Terminal records report their status; ids the engine has
            // never tracked report "unknown".
            let status = if let Some(r) = self.inner.completed.read().await.get(&id) {
                Some(r.status.to_string())
            } else {
                self.inner
                    .failed
                    .read()
                    .await
                    .get(&id)
                    .map(|r| r.status.to_string())
            };
            return Err(TaskError::InvalidState {
                id,
                status: status.unwrap_or_else(|| "unknown".to_string()),
            }
            .into());
        };

        if let Err(e) = entry.record.transition_to(TaskStatus::Cancelled) {
            // Unreachable for the statuses the active map holds; put the
            // entry back untouched rather than lose it.
            tracing::warn!(task_id = %id, error = %e, "Cancel transition rejected");
            let status = entry.record.status.to_string();
            self.inner.active.write().await.insert(id, entry);
            return Err(TaskError::InvalidState { id, status }.into());
        }
        entry
            .cancelled
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let record = entry.record;

        tracing::info!(task_id = %id, "Task cancelled");
        self.inner.completed.write().await.insert(id, record.clone());
        self.inner.log_task_record((&record).into());
        self.inner.publish_terminal(&record);
        Ok(())
    }

    /// Non-blocking snapshot of queues, workers, task counts and metrics.
    pub async fn system_status(&self) -> SystemStatus {
        let queue_depths = self.inner.queues.depths().await;
        let workers: Vec<WorkerHandle> =
            self.inner.workers.read().await.values().cloned().collect();
        let worker_stats = self.inner.worker_stats().await;
        SystemStatus {
            queue_depths,
            active_tasks: self.inner.active.read().await.len(),
            completed_tasks: self.inner.completed.read().await.len(),
            failed_tasks: self.inner.failed.read().await.len(),
            metrics: self.inner.metrics.snapshot(queue_depths, worker_stats).await,
            workers,
        }
    }

    /// Stop the monitors and the worker pool. Queued tasks stay in memory
    /// until drop; running handlers are aborted at their next await point.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);

        for handle in self.monitors.write().await.drain(..) {
            handle.abort();
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut worker_tasks = self.inner.worker_tasks.write().await;
            worker_tasks.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.abort();
        }
        join_all(handles).await;

        tracing::info!(engine = %self.inner.config.name, "Engine stopped");
    }
}
