//! grade-worker: claims queued grade submissions from Redis and writes them to PostgreSQL.

use anyhow::Context;
use clap::Parser;
use grade_stats_service::cli::WorkerArgs;
use grade_stats_service::queue::RedisTaskQueue;
use grade_stats_service::queue::worker::{GradeTaskHandler, RetryPolicy, WorkerPool};
use grade_stats_service::store::PgGradeStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WorkerArgs::parse();

    fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level)?)
        .init();

    info!("Initializing database pool...");
    let pool = grade_stats_service::init_pool(&args.connection_str, args.db_pool_max_size)
        .context("Failed to initialize database pool")?;
    let store = PgGradeStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("Failed to prepare database schema")?;

    let queue = RedisTaskQueue::connect(&args.redis_url, &args.queue_namespace)
        .await
        .context("Failed to connect to the task queue")?
        .with_lease(Duration::from_secs(args.lease_secs));
    match (queue.pending().await, queue.in_flight().await) {
        (Ok(pending), Ok(in_flight)) => info!(
            "{} task(s) waiting on the schedule, {} leased",
            pending, in_flight
        ),
        (Err(e), _) | (_, Err(e)) => warn!("Could not read queue depth: {}", e),
    }

    let handler = GradeTaskHandler::new(Arc::new(store), args.task_grade_policy);
    let retry = RetryPolicy {
        max_retries: args.max_retries,
        base_delay: Duration::from_secs(args.retry_base_secs),
    };
    info!(
        "Task grade policy: {:?}, max retries: {}",
        args.task_grade_policy, retry.max_retries
    );

    let pool = WorkerPool::new(
        Arc::new(queue),
        handler,
        args.concurrency,
        Duration::from_millis(args.poll_interval_ms),
        retry,
    );

    pool.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl_c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await;

    Ok(())
}
