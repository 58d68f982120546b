//! Worker execution loop — pull, execute, report.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::EngineInner;
use crate::registry::HandlerContext;
use crate::task::{TaskRecord, TaskStatus};

/// Status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Polling for work.
    Idle,
    /// Executing a handler.
    Processing,
    /// Last execution failed; clears on the next claim.
    Error,
}

/// Bookkeeping entry for one worker. Created at startup or by the health
/// monitor on restart; destroyed only at engine shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHandle {
    pub id: Uuid,
    pub status: WorkerStatus,
    pub current_task_id: Option<Uuid>,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    /// Cumulative handler time, for average recomputation at flush time.
    pub total_processing_ms: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl WorkerHandle {
    fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: WorkerStatus::Idle,
            current_task_id: None,
            tasks_processed: 0,
            tasks_failed: 0,
            total_processing_ms: 0,
            started_at: now,
            last_activity_at: now,
        }
    }
}

/// Register a (fresh or reset) worker handle and spawn its loop. Passing
/// an existing id restarts that worker with zeroed counters.
pub(crate) async fn spawn_worker(inner: &Arc<EngineInner>, reuse_id: Option<Uuid>) -> Uuid {
    let worker_id = reuse_id.unwrap_or_else(Uuid::new_v4);
    inner
        .workers
        .write()
        .await
        .insert(worker_id, WorkerHandle::new(worker_id));

    let handle = tokio::spawn(run_worker(Arc::clone(inner), worker_id));
    inner.worker_tasks.write().await.insert(worker_id, handle);

    tracing::info!(worker_id = %worker_id, restarted = reuse_id.is_some(), "Worker spawned");
    worker_id
}

/// Apply a mutation to a worker's handle under the table lock.
pub(crate) async fn update_worker<F>(inner: &EngineInner, worker_id: Uuid, f: F)
where
    F: FnOnce(&mut WorkerHandle),
{
    if let Some(handle) = inner.workers.write().await.get_mut(&worker_id) {
        f(handle);
    }
}

/// The worker loop: claim the next task in priority order, execute it,
/// report the outcome. Blocks only on a bounded poll sleep when the
/// queues are empty, so shutdown checks stay responsive.
async fn run_worker(inner: Arc<EngineInner>, worker_id: Uuid) {
    let mut shutdown = inner.shutdown.subscribe();
    tracing::debug!(worker_id = %worker_id, "Worker loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match claim_next(&inner).await {
            Some((task, cancelled)) => {
                execute_task(&inner, worker_id, task, cancelled).await;
            }
            None => {
                update_worker(&inner, worker_id, |w| w.last_activity_at = Utc::now()).await;
                tokio::select! {
                    _ = tokio::time::sleep(inner.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    tracing::debug!(worker_id = %worker_id, "Worker loop stopped");
}

/// Pop queue entries until one still maps to a Pending record, and claim
/// it under a single critical section. Ids whose record has left the
/// active map (cancelled tasks) are skipped.
async fn claim_next(inner: &Arc<EngineInner>) -> Option<(TaskRecord, Arc<AtomicBool>)> {
    loop {
        let (_, task_id) = inner.queues.dequeue_next().await?;
        let mut active = inner.active.write().await;
        match active.get_mut(&task_id) {
            Some(entry) if entry.record.status == TaskStatus::Pending => {
                if let Err(e) = entry.record.transition_to(TaskStatus::Processing) {
                    tracing::warn!(task_id = %task_id, error = %e, "Claim transition rejected");
                    continue;
                }
                return Some((entry.record.clone(), Arc::clone(&entry.cancelled)));
            }
            _ => {
                tracing::debug!(task_id = %task_id, "Skipping stale queue entry");
            }
        }
    }
}

/// Execute one claimed task. Only bookkeeping happens under locks; the
/// handler itself runs unsynchronized and may block arbitrarily long
/// (bounded by the task's own deadline when it declares one).
async fn execute_task(
    inner: &Arc<EngineInner>,
    worker_id: Uuid,
    task: TaskRecord,
    cancelled: Arc<AtomicBool>,
) {
    update_worker(inner, worker_id, |w| {
        w.status = WorkerStatus::Processing;
        w.current_task_id = Some(task.id);
        w.last_activity_at = Utc::now();
    })
    .await;
    inner.log_task_record((&task).into());

    tracing::debug!(
        worker_id = %worker_id,
        task_id = %task.id,
        task_type = %task.task_type,
        "Task execution started"
    );

    let start = Instant::now();
    let outcome = match inner.registry.get(&task.task_type).await {
        Some(handler) => {
            let ctx = HandlerContext::new(task.id, task.owner_id.clone(), cancelled);
            if task.timeout_secs > 0 {
                let deadline = Duration::from_secs(task.timeout_secs);
                match tokio::time::timeout(deadline, handler.run(&ctx, task.payload.clone())).await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "handler timed out after {}s",
                        task.timeout_secs
                    )),
                }
            } else {
                handler.run(&ctx, task.payload.clone()).await
            }
        }
        // Type was validated at submission; the handler has since been
        // unregistered. Goes through the normal failure path.
        None => Err(anyhow::anyhow!(
            "no handler registered for task type {}",
            task.task_type
        )),
    };
    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;

    match outcome {
        Ok(result) => {
            let recorded = inner.complete_task(task.id, result).await;
            if recorded {
                inner.metrics.record_success(elapsed).await;
                tracing::info!(
                    worker_id = %worker_id,
                    task_id = %task.id,
                    elapsed_ms,
                    "Task completed"
                );
            }
            update_worker(inner, worker_id, |w| {
                w.status = WorkerStatus::Idle;
                w.current_task_id = None;
                // Discarded results (cancelled tasks) count nowhere, so the
                // per-worker counters track the collector totals.
                if recorded {
                    w.tasks_processed += 1;
                    w.total_processing_ms += elapsed_ms;
                }
                w.last_activity_at = Utc::now();
            })
            .await;
        }
        Err(e) => {
            update_worker(inner, worker_id, |w| {
                w.status = WorkerStatus::Error;
                w.current_task_id = None;
                w.tasks_failed += 1;
                w.total_processing_ms += elapsed_ms;
                w.last_activity_at = Utc::now();
            })
            .await;
            crate::retry::handle_failure(inner, task.id, e.to_string(), elapsed).await;
        }
    }
}
