use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

mod redis_queue;
pub mod worker;

pub use redis_queue::RedisTaskQueue;

/// Kind of a queued write; the wire names match the task types workers register.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    #[serde(rename = "task:add_student_grade")]
    AddStudentGrade,
    #[serde(rename = "task:add_student_grade_task")]
    AddStudentGradeTask,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AddStudentGrade => "task:add_student_grade",
            TaskKind::AddStudentGradeTask => "task:add_student_grade_task",
        }
    }
}

/// A unit of work as stored on the queue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub retried: u32,
}

impl TaskEnvelope {
    pub fn new<P: Serialize>(kind: TaskKind, payload: &P) -> Result<Self, QueueError> {
        Ok(TaskEnvelope {
            id: Uuid::new_v4(),
            kind,
            payload: serde_json::to_value(payload)?,
            enqueued_at: Utc::now(),
            retried: 0,
        })
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to serialize task: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid delay policy: min {min:?} is greater than max {max:?}")]
    InvalidDelayPolicy { min: Duration, max: Duration },

    #[error("corrupt task envelope: {0}")]
    CorruptEnvelope(String),
}

/// Producer side of the task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Stores `task` so that it becomes due after `process_in`.
    async fn schedule(&self, task: TaskEnvelope, process_in: Duration) -> Result<(), QueueError>;
}

/// Consumer side of the task queue, driven by the worker pool.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Leases up to `max` tasks whose due time has passed. A task that is not
    /// acked, retried or buried before its lease runs out becomes due again.
    async fn claim_due(&self, max: usize) -> Result<Vec<TaskEnvelope>, QueueError>;

    /// Records that a claimed task succeeded and drops it from the queue.
    async fn ack(&self, task: &TaskEnvelope) -> Result<(), QueueError>;

    /// Puts a failed task back with its retry counter already bumped.
    async fn retry(&self, task: TaskEnvelope, process_in: Duration) -> Result<(), QueueError>;

    /// Moves a task that will not be retried out of the schedule.
    async fn bury(&self, task: TaskEnvelope, reason: &str) -> Result<(), QueueError>;
}

/// Bounds of the random processing delay applied to every enqueued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    min: Duration,
    max: Duration,
}

impl DelayPolicy {
    pub fn new(min: Duration, max: Duration) -> Result<Self, QueueError> {
        if min > max {
            return Err(QueueError::InvalidDelayPolicy { min, max });
        }
        Ok(DelayPolicy { min, max })
    }

    pub fn from_secs(min_secs: u64, max_secs: u64) -> Result<Self, QueueError> {
        Self::new(Duration::from_secs(min_secs), Duration::from_secs(max_secs))
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Whole seconds drawn uniformly from `[min, max]`, both ends included.
    pub fn sample(&self) -> Duration {
        let secs = rand::thread_rng().gen_range(self.min.as_secs()..=self.max.as_secs());
        Duration::from_secs(secs)
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        DelayPolicy {
            min: Duration::from_secs(30),
            max: Duration::from_secs(180),
        }
    }
}

/// Schedules grade writes on the task queue with a randomized delay.
#[derive(Clone)]
pub struct Enqueuer {
    queue: Arc<dyn TaskQueue>,
    delays: DelayPolicy,
}

/// What the caller learns about a successfully queued task.
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub task_id: Uuid,
    pub delay: Duration,
}

impl Enqueuer {
    pub fn new(queue: Arc<dyn TaskQueue>, delays: DelayPolicy) -> Self {
        Enqueuer { queue, delays }
    }

    /// Serializes `payload` and schedules it. Failures are returned as-is, never retried here.
    pub async fn enqueue<P: Serialize>(
        &self,
        kind: TaskKind,
        payload: &P,
    ) -> Result<Enqueued, QueueError> {
        let task = TaskEnvelope::new(kind, payload)?;
        let task_id = task.id;
        let delay = self.delays.sample();

        if let Err(e) = self.queue.schedule(task, delay).await {
            error!("Failed to enqueue task {}: {}", kind.as_str(), e);
            return Err(e);
        }

        info!(
            "Task enqueued: {} (id {}, processing in {}s)",
            kind.as_str(),
            task_id,
            delay.as_secs()
        );
        Ok(Enqueued { task_id, delay })
    }
}
