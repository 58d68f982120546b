//! taskmill — in-process, priority-aware async task engine.
//!
//! Bounded per-priority FIFO queues, a dynamically sized worker pool,
//! exponential-backoff retries, health-monitored workers and aggregate
//! metrics. Business logic is supplied as pluggable [`registry::Handler`]
//! implementations; durability and pub/sub are external collaborators
//! behind the [`sink::LogSink`] trait and the task-event broadcast.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod sink;
pub mod task;

pub use config::{EngineConfig, QueueCapacities};
pub use engine::{Engine, SystemStatus};
pub use error::{Error, Result, SubmitError, TaskError};
pub use notify::TaskEvent;
pub use registry::{Handler, HandlerContext, HandlerRegistry};
pub use sink::{LogSink, MemorySink, NoopSink, TaskLogRecord};
pub use task::{NewTask, Priority, TaskRecord, TaskStatus};
