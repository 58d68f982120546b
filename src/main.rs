use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskmill::{
    Engine, EngineConfig, Handler, HandlerContext, MemorySink, NewTask, Priority, TaskStatus,
};

/// Demo handler: sleeps for `ms` then echoes the payload back.
struct SleepEcho;

#[async_trait]
impl Handler for SleepEcho {
    fn task_type(&self) -> &str {
        "sleep_echo"
    }

    async fn run(
        &self,
        ctx: &HandlerContext,
        payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let ms = payload.get("ms").and_then(|v| v.as_u64()).unwrap_or(50);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        if ctx.is_cancelled() {
            anyhow::bail!("cancelled mid-flight");
        }
        Ok(payload)
    }
}

/// Demo handler that fails on every attempt, to show the retry path.
struct AlwaysFails;

#[async_trait]
impl Handler for AlwaysFails {
    fn task_type(&self) -> &str {
        "always_fails"
    }

    async fn run(
        &self,
        _ctx: &HandlerContext,
        _payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("simulated handler failure")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = EngineConfig::default();
    config.min_workers = std::env::var("TASKMILL_MIN_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(config.min_workers);
    config.max_workers = std::env::var("TASKMILL_MAX_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(config.max_workers);
    config.backoff_unit = Duration::from_millis(200);

    eprintln!("taskmill v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}..{}", config.min_workers, config.max_workers);

    let engine = Engine::new(config, Arc::new(MemorySink::new()));
    engine.registry().register(Arc::new(SleepEcho)).await;
    engine.registry().register(Arc::new(AlwaysFails)).await;

    let mut events = engine.subscribe();
    engine.start().await;

    // A small mixed batch: mostly echoes, one guaranteed failure.
    let mut submitted = Vec::new();
    for i in 0..8 {
        let priority = if i % 4 == 0 {
            Priority::High
        } else {
            Priority::Medium
        };
        let id = engine
            .create_task(
                NewTask::new("sleep_echo", serde_json::json!({"ms": 30, "n": i}))
                    .owner("demo")
                    .priority(priority),
            )
            .await?;
        submitted.push(id);
    }
    let failing = engine
        .create_task(
            NewTask::new("always_fails", serde_json::json!({}))
                .owner("demo")
                .max_retries(2),
        )
        .await?;
    submitted.push(failing);

    // Drain terminal events until the whole batch has settled.
    let mut settled = 0;
    while settled < submitted.len() {
        match tokio::time::timeout(Duration::from_secs(30), events.recv()).await {
            Ok(Ok(event)) => {
                settled += 1;
                match event.status {
                    TaskStatus::Failed => {
                        eprintln!(
                            "   task {} failed: {}",
                            event.task_id,
                            event.error.unwrap_or_default()
                        );
                    }
                    status => eprintln!("   task {} -> {}", event.task_id, status),
                }
            }
            Ok(Err(_)) => break,
            Err(_) => {
                eprintln!("   timed out waiting for batch to settle");
                break;
            }
        }
    }

    let status = engine.system_status().await;
    eprintln!(
        "   processed={} failed={} error_rate={:.2} workers={}",
        status.metrics.total_processed,
        status.metrics.total_failed,
        status.metrics.error_rate,
        status.workers.len()
    );

    engine.shutdown().await;
    Ok(())
}
