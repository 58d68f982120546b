//! Error types for the task engine.

use uuid::Uuid;

use crate::task::Priority;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Errors returned synchronously at task submission. Rejected tasks never
/// enter a queue.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Queue for priority {priority} is at capacity ({capacity})")]
    QueueSaturated { priority: Priority, capacity: usize },
}

/// Errors for status queries and cancellation.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} is {status}, cannot cancel")]
    InvalidState { id: Uuid, status: String },
}

/// Log sink errors. Sink writes are fire-and-forget from the engine's
/// perspective; failures are logged, not propagated into task processing.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink write failed: {0}")]
    Write(String),

    #[error("Sink read failed: {0}")]
    Read(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
