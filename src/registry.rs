//! Handler abstraction — pluggable business logic dispatched by task type.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Execution context passed to a handler.
///
/// Cancellation is cooperative: `Cancel` raises the flag but never
/// interrupts a running handler. Handlers that want to honor cancellation
/// poll `is_cancelled()`; otherwise they run to completion and the engine
/// discards the result.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    task_id: Uuid,
    owner_id: String,
    cancelled: Arc<AtomicBool>,
}

impl HandlerContext {
    pub(crate) fn new(task_id: Uuid, owner_id: String, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            task_id,
            owner_id,
            cancelled,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// True once the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Business logic for one task type.
///
/// The engine is agnostic to what a handler does; an `Err` return is
/// recovered by the retry path, never propagated to the submitter.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Registry key this handler serves.
    fn task_type(&self) -> &str;

    /// Execute the task payload, returning an opaque result payload.
    async fn run(
        &self,
        ctx: &HandlerContext,
        payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Registry of task handlers, keyed by task type.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under its task type. Replaces any previous
    /// handler for the same type.
    pub async fn register(&self, handler: Arc<dyn Handler>) {
        let task_type = handler.task_type().to_string();
        self.handlers
            .write()
            .await
            .insert(task_type.clone(), handler);
        tracing::debug!(task_type = %task_type, "Registered handler");
    }

    /// Remove a handler.
    pub async fn unregister(&self, task_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.write().await.remove(task_type)
    }

    /// Look up a handler by task type.
    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().await.get(task_type).cloned()
    }

    /// Check if a task type has a registered handler.
    pub async fn has(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    /// List registered task types.
    pub async fn list(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        fn task_type(&self) -> &str {
            "echo"
        }

        async fn run(
            &self,
            _ctx: &HandlerContext,
            payload: serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = HandlerRegistry::new();
        assert!(!registry.has("echo").await);

        registry.register(Arc::new(Echo)).await;
        assert!(registry.has("echo").await);
        assert!(registry.get("echo").await.is_some());
        assert!(registry.get("missing").await.is_none());
        assert_eq!(registry.list().await, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn unregister_removes_handler() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Echo)).await;
        assert!(registry.unregister("echo").await.is_some());
        assert!(!registry.has("echo").await);
    }

    #[tokio::test]
    async fn context_cancellation_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = HandlerContext::new(Uuid::new_v4(), "owner".to_string(), flag.clone());
        assert!(!ctx.is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(ctx.is_cancelled());
    }
}
