//! Bounded priority queues — four FIFO queues with strict-precedence dequeue.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::QueueCapacities;
use crate::error::SubmitError;
use crate::task::Priority;

/// Queue depths by priority, plus the total. Read-only snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }

    pub fn for_priority(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    critical: VecDeque<Uuid>,
    high: VecDeque<Uuid>,
    medium: VecDeque<Uuid>,
    low: VecDeque<Uuid>,
}

impl Queues {
    fn for_priority_mut(&mut self, priority: Priority) -> &mut VecDeque<Uuid> {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }
}

/// Four independent bounded FIFO queues, one per priority level.
///
/// Dequeue scans Critical → High → Medium → Low and returns the oldest
/// entry of the first non-empty queue. A continuous stream of Critical
/// work can starve Low work indefinitely; there is no aging.
///
/// The queues hold task ids only; the task records themselves live in the
/// engine's active map. An id whose record has left the active map (a
/// cancelled task) is simply skipped by the claiming worker.
pub struct PriorityQueueSet {
    queues: RwLock<Queues>,
    capacities: QueueCapacities,
}

impl PriorityQueueSet {
    pub fn new(capacities: QueueCapacities) -> Self {
        Self {
            queues: RwLock::new(Queues::default()),
            capacities,
        }
    }

    /// Insert a task id into the queue for its priority. Fails when that
    /// queue is at capacity; the caller decides whether to retry or reject.
    /// The engine never blocks silently here.
    pub async fn enqueue(&self, priority: Priority, id: Uuid) -> Result<(), SubmitError> {
        let capacity = self.capacities.for_priority(priority);
        let mut queues = self.queues.write().await;
        let queue = queues.for_priority_mut(priority);
        if queue.len() >= capacity {
            return Err(SubmitError::QueueSaturated { priority, capacity });
        }
        queue.push_back(id);
        Ok(())
    }

    /// Pop the next task id in strict priority order, FIFO within a level.
    pub async fn dequeue_next(&self) -> Option<(Priority, Uuid)> {
        let mut queues = self.queues.write().await;
        for priority in Priority::ALL {
            if let Some(id) = queues.for_priority_mut(priority).pop_front() {
                return Some((priority, id));
            }
        }
        None
    }

    /// Current per-priority depths.
    pub async fn depths(&self) -> QueueDepths {
        let queues = self.queues.read().await;
        QueueDepths {
            critical: queues.critical.len(),
            high: queues.high.len(),
            medium: queues.medium.len(),
            low: queues.low.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_set() -> PriorityQueueSet {
        PriorityQueueSet::new(QueueCapacities {
            critical: 2,
            high: 2,
            medium: 2,
            low: 2,
        })
    }

    #[tokio::test]
    async fn strict_priority_order() {
        let queues = small_set();
        let low = Uuid::new_v4();
        let critical = Uuid::new_v4();
        let high = Uuid::new_v4();

        queues.enqueue(Priority::Low, low).await.unwrap();
        queues.enqueue(Priority::High, high).await.unwrap();
        queues.enqueue(Priority::Critical, critical).await.unwrap();

        assert_eq!(
            queues.dequeue_next().await,
            Some((Priority::Critical, critical))
        );
        assert_eq!(queues.dequeue_next().await, Some((Priority::High, high)));
        assert_eq!(queues.dequeue_next().await, Some((Priority::Low, low)));
        assert_eq!(queues.dequeue_next().await, None);
    }

    #[tokio::test]
    async fn fifo_within_one_level() {
        let queues = small_set();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        queues.enqueue(Priority::Medium, first).await.unwrap();
        queues.enqueue(Priority::Medium, second).await.unwrap();

        assert_eq!(
            queues.dequeue_next().await,
            Some((Priority::Medium, first))
        );
        assert_eq!(
            queues.dequeue_next().await,
            Some((Priority::Medium, second))
        );
    }

    #[tokio::test]
    async fn saturation_rejects_without_growing_depth() {
        let queues = small_set();
        queues.enqueue(Priority::Low, Uuid::new_v4()).await.unwrap();
        queues.enqueue(Priority::Low, Uuid::new_v4()).await.unwrap();

        let err = queues.enqueue(Priority::Low, Uuid::new_v4()).await;
        assert!(matches!(
            err,
            Err(SubmitError::QueueSaturated {
                priority: Priority::Low,
                capacity: 2
            })
        ));
        assert_eq!(queues.depths().await.low, 2);

        // Other levels are unaffected by a saturated neighbor.
        queues
            .enqueue(Priority::Critical, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(queues.depths().await.critical, 1);
    }

    #[tokio::test]
    async fn depths_snapshot() {
        let queues = small_set();
        queues.enqueue(Priority::High, Uuid::new_v4()).await.unwrap();
        queues.enqueue(Priority::Low, Uuid::new_v4()).await.unwrap();

        let depths = queues.depths().await;
        assert_eq!(depths.high, 1);
        assert_eq!(depths.low, 1);
        assert_eq!(depths.total(), 2);
        assert_eq!(depths.for_priority(Priority::Critical), 0);
    }
}
