use crate::cli::Args;
use crate::queue::{DelayPolicy, Enqueuer, RedisTaskQueue};
use crate::store::{GradeRepository, PgGradeStore};
use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use deadpool_diesel::Runtime;
use deadpool_diesel::postgres::{Manager, Pool};
use std::sync::Arc;
use tracing::info;

pub mod cli;
pub mod model;
pub mod payloads;
pub mod queue;
pub mod response;
pub mod schema;
pub mod store;

mod api;
mod errors;

/// Shared handler state: the grade store for reads and the enqueuer for writes.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn GradeRepository>,
    pub enqueuer: Enqueuer,
}

pub async fn init_router(args: &Args) -> anyhow::Result<Router> {
    info!("Initializing database pool...");
    let pool = init_pool(&args.connection_str, args.db_pool_max_size)
        .context("Failed to initialize database pool")?;

    let store = PgGradeStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("Failed to prepare database schema")?;

    info!("Initializing task queue...");
    let delays = DelayPolicy::from_secs(args.enqueue_min_delay_secs, args.enqueue_max_delay_secs)
        .context("Invalid enqueue delay bounds")?;
    info!(
        "Queued grades are written after {}s to {}s",
        delays.min().as_secs(),
        delays.max().as_secs()
    );
    let queue = RedisTaskQueue::connect(&args.redis_url, &args.queue_namespace)
        .await
        .context("Failed to connect to the task queue")?;

    let state = AppState {
        repository: Arc::new(store),
        enqueuer: Enqueuer::new(Arc::new(queue), delays),
    };

    info!("Initializing router...");
    Ok(init_router_internal(state))
}

pub fn init_test_router(state: AppState) -> Router {
    init_router_internal(state)
}

fn init_router_internal(state: AppState) -> Router {
    Router::new().nest("/stats", stats_routes()).with_state(state)
}

pub fn init_pool(conn_str: &str, max_size: u32) -> anyhow::Result<Pool> {
    let manager = Manager::new(conn_str, Runtime::Tokio1);
    let pool = Pool::builder(manager).max_size(max_size as usize).build()?;
    Ok(pool)
}

fn stats_routes() -> Router<AppState> {
    Router::new()
        // submissions
        .route("/student/grade", post(api::submit::submit_course_grade))
        .route("/student/task/grade", post(api::submit::submit_task_grade))
        // student reads
        .route(
            "/student/{student_id}/course/{course_id}",
            get(api::stats::get_student_course_average),
        )
        .route(
            "/student/{student_id}/course/{course_id}/task/average",
            get(api::stats::get_student_task_averages),
        )
        .route(
            "/student/{student_id}/course/{course_id}/task/{task_id}",
            get(api::stats::get_student_task_average),
        )
        .route(
            "/student/{student_id}/average",
            get(api::stats::get_student_averages_over_time),
        )
        // course reads
        .route(
            "/course/{course_id}/average",
            get(api::stats::get_course_averages_over_time),
        )
        .route(
            "/course/{course_id}/task/{task_id}/averages",
            get(api::stats::get_task_averages),
        )
        .route(
            "/course/{course_id}/on_time_percentage",
            get(api::stats::get_course_on_time_percentage),
        )
        .route(
            "/course/{course_id}/student/{student_id}/on_time_percentage",
            get(api::stats::get_student_on_time_percentage),
        )
        .route("/health", get(api::health::health))
}
