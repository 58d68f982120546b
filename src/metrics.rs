//! System-wide metrics — running counters owned by the collector,
//! read-only snapshots for everyone else.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::queue::QueueDepths;

/// Per-worker figures included in a metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: Uuid,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    /// Average handler time, recomputed from the worker's cumulative
    /// counters at flush time.
    pub avg_processing_ms: f64,
}

/// Point-in-time view of the system counters, flushed periodically to the
/// log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub at: DateTime<Utc>,
    /// Tasks that reached a terminal outcome (success or failure).
    pub total_processed: u64,
    /// Tasks that ended in terminal failure.
    pub total_failed: u64,
    /// `total_failed / total_processed`; 0 when nothing has finished yet.
    pub error_rate: f64,
    /// Running average handler time across all completed executions.
    pub avg_processing_ms: f64,
    pub queue_depths: QueueDepths,
    pub active_workers: usize,
    pub workers: Vec<WorkerStats>,
}

#[derive(Debug, Default)]
struct Counters {
    total_processed: u64,
    total_failed: u64,
    total_processing_ms: u64,
    executions: u64,
}

/// Owns the mutable system counters. Workers and the retry path record
/// outcomes here; other components only ever read snapshots.
#[derive(Default)]
pub struct MetricsCollector {
    counters: RwLock<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task that completed successfully.
    pub async fn record_success(&self, elapsed: Duration) {
        let mut counters = self.counters.write().await;
        counters.total_processed += 1;
        counters.executions += 1;
        counters.total_processing_ms += elapsed.as_millis() as u64;
    }

    /// Record a handler attempt that failed but will be retried. Counts
    /// toward processing time, not toward the terminal totals.
    pub async fn record_retry(&self, elapsed: Duration) {
        let mut counters = self.counters.write().await;
        counters.executions += 1;
        counters.total_processing_ms += elapsed.as_millis() as u64;
    }

    /// Record a task whose retries are exhausted.
    pub async fn record_terminal_failure(&self) {
        let mut counters = self.counters.write().await;
        counters.total_processed += 1;
        counters.total_failed += 1;
    }

    /// Build a snapshot from the counters plus caller-supplied queue and
    /// worker state.
    pub async fn snapshot(
        &self,
        queue_depths: QueueDepths,
        workers: Vec<WorkerStats>,
    ) -> MetricsSnapshot {
        let counters = self.counters.read().await;
        let error_rate = if counters.total_processed > 0 {
            counters.total_failed as f64 / counters.total_processed as f64
        } else {
            0.0
        };
        let avg_processing_ms = if counters.executions > 0 {
            counters.total_processing_ms as f64 / counters.executions as f64
        } else {
            0.0
        };
        MetricsSnapshot {
            at: Utc::now(),
            total_processed: counters.total_processed,
            total_failed: counters.total_failed,
            error_rate,
            avg_processing_ms,
            queue_depths,
            active_workers: workers.len(),
            workers,
        }
    }
}

/// Spawn the periodic collector loop: flush a snapshot to the log sink
/// and purge terminal records past their retention windows, capping
/// memory growth on long-running instances.
pub(crate) fn spawn_metrics_loop(inner: &std::sync::Arc<crate::engine::EngineInner>) -> tokio::task::JoinHandle<()> {
    let inner = std::sync::Arc::clone(inner);
    tokio::spawn(async move {
        let mut shutdown = inner.shutdown.subscribe();
        let mut tick = tokio::time::interval(inner.config.metrics_interval);
        tracing::debug!(
            interval_secs = inner.config.metrics_interval.as_secs(),
            "Metrics collector started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => flush(&inner).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn flush(inner: &std::sync::Arc<crate::engine::EngineInner>) {
    let depths = inner.queues.depths().await;
    let workers = inner.worker_stats().await;
    let snapshot = inner.metrics.snapshot(depths, workers).await;

    tracing::debug!(
        total_processed = snapshot.total_processed,
        total_failed = snapshot.total_failed,
        error_rate = snapshot.error_rate,
        queued = snapshot.queue_depths.total(),
        "Flushing metrics snapshot"
    );
    if let Err(e) = inner.sink.record_metrics(snapshot).await {
        tracing::warn!(error = %e, "Failed to flush metrics to sink");
    }

    purge_terminal(inner).await;
}

/// Drop completed/cancelled records older than the completed-retention
/// window and failed records older than the (longer) failed-retention
/// window.
async fn purge_terminal(inner: &std::sync::Arc<crate::engine::EngineInner>) {
    let now = Utc::now();

    if let Ok(window) = chrono::Duration::from_std(inner.config.completed_retention) {
        let cutoff = now - window;
        let mut completed = inner.completed.write().await;
        let before = completed.len();
        completed.retain(|_, r| r.completed_at.map(|t| t > cutoff).unwrap_or(true));
        let purged = before - completed.len();
        if purged > 0 {
            tracing::info!(purged, "Purged expired completed records");
        }
    }

    if let Ok(window) = chrono::Duration::from_std(inner.config.failed_retention) {
        let cutoff = now - window;
        let mut failed = inner.failed.write().await;
        let before = failed.len();
        failed.retain(|_, r| r.completed_at.map(|t| t > cutoff).unwrap_or(true));
        let purged = before - failed.len();
        if purged > 0 {
            tracing::info!(purged, "Purged expired failed records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_rate_is_failed_over_processed() {
        let metrics = MetricsCollector::new();
        for _ in 0..7 {
            metrics.record_success(Duration::from_millis(10)).await;
        }
        for _ in 0..3 {
            metrics.record_terminal_failure().await;
        }

        let snapshot = metrics.snapshot(QueueDepths::default(), Vec::new()).await;
        assert_eq!(snapshot.total_processed, 10);
        assert_eq!(snapshot.total_failed, 3);
        assert!((snapshot.error_rate - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_counters_report_zero_rates() {
        let metrics = MetricsCollector::new();
        let snapshot = metrics.snapshot(QueueDepths::default(), Vec::new()).await;
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.avg_processing_ms, 0.0);
    }

    #[tokio::test]
    async fn retries_count_toward_average_not_totals() {
        let metrics = MetricsCollector::new();
        metrics.record_retry(Duration::from_millis(30)).await;
        metrics.record_success(Duration::from_millis(10)).await;

        let snapshot = metrics.snapshot(QueueDepths::default(), Vec::new()).await;
        assert_eq!(snapshot.total_processed, 1);
        assert_eq!(snapshot.total_failed, 0);
        assert!((snapshot.avg_processing_ms - 20.0).abs() < f64::EPSILON);
    }
}
