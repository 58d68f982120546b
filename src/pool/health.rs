//! Health monitor — restarts workers that have stopped reporting activity.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::EngineInner;
use crate::pool::worker::spawn_worker;
use crate::task::TaskStatus;

/// Spawn the periodic health sweep. A worker silent for longer than the
/// configured stall threshold is presumed stuck: the task it was holding
/// is re-enqueued, its loop is aborted, and a fresh loop is started under
/// the same worker id with zeroed counters.
pub(crate) fn spawn_health_monitor(inner: &Arc<EngineInner>) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let mut shutdown = inner.shutdown.subscribe();
        let mut tick = tokio::time::interval(inner.config.health_check_interval);
        tracing::debug!(
            interval_secs = inner.config.health_check_interval.as_secs(),
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => sweep(&inner).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// One sweep over the worker table.
async fn sweep(inner: &Arc<EngineInner>) {
    let threshold = match chrono::Duration::from_std(inner.config.worker_stall_threshold) {
        Ok(d) => d,
        Err(_) => chrono::Duration::seconds(300),
    };
    let now = Utc::now();

    let stalled: Vec<Uuid> = inner
        .workers
        .read()
        .await
        .values()
        .filter(|w| now - w.last_activity_at > threshold)
        .map(|w| w.id)
        .collect();

    for worker_id in stalled {
        tracing::warn!(worker_id = %worker_id, "Worker presumed stuck, restarting");

        if let Some(old) = inner.worker_tasks.write().await.remove(&worker_id) {
            old.abort();
        }

        // Read the held task only after the abort: the worker may have
        // woken and claimed different work since the stall snapshot.
        let orphaned_task = inner
            .workers
            .read()
            .await
            .get(&worker_id)
            .and_then(|w| w.current_task_id);
        if let Some(task_id) = orphaned_task {
            requeue_orphan(inner, task_id).await;
        }

        // spawn_worker under the same id replaces the handle with a fresh
        // one: counters zeroed, status Idle.
        spawn_worker(inner, Some(worker_id)).await;
    }
}

/// Put the task a stuck worker was holding back in its priority queue
/// instead of losing it. If the queue is saturated the task fails
/// terminally rather than vanishing.
async fn requeue_orphan(inner: &Arc<EngineInner>, task_id: Uuid) {
    let priority = {
        let mut active = inner.active.write().await;
        match active.get_mut(&task_id) {
            Some(entry) if entry.record.status == TaskStatus::Processing => {
                // Recovery reset, outside the normal transition matrix: the
                // claiming worker is gone, so Processing reverts to Pending.
                entry.record.status = TaskStatus::Pending;
                Some(entry.record.priority)
            }
            _ => None,
        }
    };

    let Some(priority) = priority else {
        return;
    };

    tracing::info!(task_id = %task_id, "Re-enqueued task orphaned by stuck worker");
    if let Err(e) = inner.queues.enqueue(priority, task_id).await {
        inner
            .fail_task_terminal(task_id, format!("orphaned task could not be re-enqueued: {e}"))
            .await;
    }
}
