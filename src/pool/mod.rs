//! Worker pool — execution loops, health monitoring and autoscaling.
//!
//! Core components:
//! - `worker` — WorkerHandle table and the pull-execute-report loop
//! - `health` — periodic sweep restarting workers that stopped reporting
//! - `scaler` — queue-depth-driven scale-up of the pool

pub mod health;
pub mod scaler;
pub mod worker;

pub use worker::{WorkerHandle, WorkerStatus};
