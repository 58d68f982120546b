//! Retry coordination — exponential backoff and deferred re-enqueue.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::engine::EngineInner;
use crate::task::TaskStatus;

/// Computes backoff delays and drives the failure path for a task.
///
/// Retries are capped by count only, never by elapsed wall-clock time: a
/// task with a large retry limit can sit in `Retrying` for a long while.
/// Backoff carries no jitter.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    backoff_unit: Duration,
}

impl RetryCoordinator {
    pub fn new(backoff_unit: Duration) -> Self {
        Self { backoff_unit }
    }

    /// Delay before attempt `retry_count` re-enters the queue:
    /// `2^retry_count` backoff units. The exponent is clamped to keep the
    /// multiplication from overflowing on absurd retry counts.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count.min(20)).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }
}

/// Outcome decided under the active-map lock.
enum FailureDecision {
    /// Task left the active map (cancelled); drop the failure.
    Discard,
    /// Schedule a deferred re-enqueue after the given delay.
    Retry { delay: Duration, attempt: u32 },
    /// Retries exhausted; finalize as Failed.
    Exhausted,
}

/// Handle a failed handler attempt: bump the retry count, then either
/// schedule a backoff re-enqueue or finalize the task as Failed.
pub(crate) async fn handle_failure(
    inner: &Arc<EngineInner>,
    task_id: Uuid,
    error: String,
    elapsed: Duration,
) {
    let decision = {
        let mut active = inner.active.write().await;
        match active.get_mut(&task_id) {
            None => FailureDecision::Discard,
            Some(entry) => {
                entry.record.retry_count += 1;
                entry.record.error_message = Some(error.clone());
                if entry.record.retry_count <= entry.record.max_retries {
                    if let Err(e) = entry.record.transition_to(TaskStatus::Retrying) {
                        tracing::warn!(task_id = %task_id, error = %e, "Retry transition rejected");
                        FailureDecision::Discard
                    } else {
                        let attempt = entry.record.retry_count;
                        inner.log_task_record((&entry.record).into());
                        FailureDecision::Retry {
                            delay: inner.retry.delay(attempt),
                            attempt,
                        }
                    }
                } else {
                    FailureDecision::Exhausted
                }
            }
        }
    };

    match decision {
        FailureDecision::Discard => {
            tracing::debug!(task_id = %task_id, "Discarding failure of untracked task");
        }
        FailureDecision::Retry { delay, attempt } => {
            inner.metrics.record_retry(elapsed).await;
            tracing::info!(
                task_id = %task_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Task failed, scheduling retry"
            );
            schedule_requeue(inner.clone(), task_id, delay);
        }
        FailureDecision::Exhausted => {
            inner.metrics.record_retry(elapsed).await;
            tracing::warn!(task_id = %task_id, error = %error, "Retries exhausted");
            inner.fail_task_terminal(task_id, error).await;
        }
    }
}

/// Sleep out the backoff, then put the task back in its priority queue.
/// A cancellation during the delay makes this a no-op; a saturated queue
/// at re-enqueue time fails the task terminally rather than dropping it.
fn schedule_requeue(inner: Arc<EngineInner>, task_id: Uuid, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let priority = {
            let mut active = inner.active.write().await;
            match active.get_mut(&task_id) {
                Some(entry) if entry.record.status == TaskStatus::Retrying => {
                    if let Err(e) = entry.record.transition_to(TaskStatus::Pending) {
                        tracing::warn!(task_id = %task_id, error = %e, "Requeue transition rejected");
                        return;
                    }
                    Some(entry.record.priority)
                }
                _ => None,
            }
        };

        let Some(priority) = priority else {
            tracing::debug!(task_id = %task_id, "Task left retry state during backoff, not re-enqueuing");
            return;
        };

        if let Err(e) = inner.queues.enqueue(priority, task_id).await {
            inner
                .fail_task_terminal(task_id, format!("re-enqueue after backoff failed: {e}"))
                .await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = RetryCoordinator::new(Duration::from_secs(1));
        assert_eq!(retry.delay(1), Duration::from_secs(2));
        assert_eq!(retry.delay(2), Duration::from_secs(4));
        assert_eq!(retry.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_scales_with_unit() {
        let retry = RetryCoordinator::new(Duration::from_millis(10));
        assert_eq!(retry.delay(1), Duration::from_millis(20));
        assert_eq!(retry.delay(4), Duration::from_millis(160));
    }

    #[test]
    fn huge_retry_counts_do_not_overflow() {
        let retry = RetryCoordinator::new(Duration::from_secs(1));
        let capped = retry.delay(63);
        assert!(capped >= retry.delay(20));
    }
}
