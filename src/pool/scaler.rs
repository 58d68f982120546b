//! Autoscaler — grows the worker pool under queue pressure.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::engine::EngineInner;
use crate::pool::worker::spawn_worker;

/// Spawn the periodic scaling loop (same cadence as the metrics flush).
///
/// Scale-up adds one worker whenever total queued depth exceeds five
/// tasks per active worker, up to `max_workers`. The scale-down condition
/// is evaluated and logged but intentionally never acted on; the pool
/// grows monotonically up to the ceiling.
pub(crate) fn spawn_autoscaler(inner: &Arc<EngineInner>) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let mut shutdown = inner.shutdown.subscribe();
        let mut tick = tokio::time::interval(inner.config.metrics_interval);
        tracing::debug!(
            interval_secs = inner.config.metrics_interval.as_secs(),
            "Autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => evaluate(&inner).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn evaluate(inner: &Arc<EngineInner>) {
    let depth = inner.queues.depths().await.total();
    let active = inner.workers.read().await.len();

    if depth > active * 5 && active < inner.config.max_workers {
        let worker_id = spawn_worker(inner, None).await;
        tracing::info!(
            worker_id = %worker_id,
            depth,
            active_workers = active + 1,
            "Scaled up under queue pressure"
        );
    } else if depth < active * 2 && active > inner.config.min_workers {
        tracing::debug!(
            depth,
            active_workers = active,
            "Scale-down condition met; worker retirement not implemented"
        );
    }
}
