//! Configuration types.

use std::time::Duration;

use crate::task::Priority;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine name for identification in logs.
    pub name: String,
    /// Per-priority queue capacities.
    pub queue_capacities: QueueCapacities,
    /// Workers started at engine startup (also the scale-down floor).
    pub min_workers: usize,
    /// Scale-up ceiling for the worker pool.
    pub max_workers: usize,
    /// Sleep between dequeue attempts when all queues are empty.
    pub poll_interval: Duration,
    /// Base unit for exponential retry backoff (delay = 2^retry_count units).
    pub backoff_unit: Duration,
    /// Default retry limit for tasks that do not specify one.
    pub default_max_retries: u32,
    /// How often the health monitor sweeps the worker table.
    pub health_check_interval: Duration,
    /// A worker silent for longer than this is presumed stuck and restarted.
    pub worker_stall_threshold: Duration,
    /// Metrics flush / autoscaler / retention-cleanup cadence.
    pub metrics_interval: Duration,
    /// Completed and cancelled records are purged after this window.
    pub completed_retention: Duration,
    /// Failed records are purged after this window.
    pub failed_retention: Duration,
    /// Capacity of the task-event broadcast channel.
    pub event_capacity: usize,
}

/// Bounded capacity for each priority queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueCapacities {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueCapacities {
    /// Capacity of the queue for a given priority.
    pub fn for_priority(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            critical: 200,
            high: 300,
            medium: 400,
            low: 500,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "taskmill".to_string(),
            queue_capacities: QueueCapacities::default(),
            min_workers: 5,
            max_workers: 20,
            poll_interval: Duration::from_millis(100),
            backoff_unit: Duration::from_secs(1),
            default_max_retries: 3,
            health_check_interval: Duration::from_secs(30),
            worker_stall_threshold: Duration::from_secs(300), // 5 minutes
            metrics_interval: Duration::from_secs(60),
            completed_retention: Duration::from_secs(24 * 3600),
            failed_retention: Duration::from_secs(7 * 24 * 3600),
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_bounds() {
        let config = EngineConfig::default();
        assert_eq!(config.min_workers, 5);
        assert_eq!(config.max_workers, 20);
        assert!(config.min_workers <= config.max_workers);
    }

    #[test]
    fn capacity_lookup_matches_priority() {
        let caps = QueueCapacities::default();
        assert_eq!(caps.for_priority(Priority::Critical), 200);
        assert_eq!(caps.for_priority(Priority::Low), 500);
    }
}
