use super::{QueueError, TaskEnvelope, TaskKind, TaskSource};
use crate::model::grade::{NewCourseGrade, NewTaskGrade};
use crate::store::{GradeRepository, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// How a task grade for an already graded (student, course, task) is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TaskGradeWritePolicy {
    /// Overwrite the existing row, keeping only the latest revision.
    #[default]
    Upsert,
    /// Append every revision as a new row.
    AlwaysInsert,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("undecodable payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    /// A payload that failed to decode will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            HandlerError::Payload(_) | HandlerError::Store(StoreError::InvalidGrade(_))
        )
    }
}

/// Writes queued grades to the store.
#[derive(Clone)]
pub struct GradeTaskHandler {
    repository: Arc<dyn GradeRepository>,
    policy: TaskGradeWritePolicy,
}

impl GradeTaskHandler {
    pub fn new(repository: Arc<dyn GradeRepository>, policy: TaskGradeWritePolicy) -> Self {
        GradeTaskHandler { repository, policy }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, kind = task.kind.as_str()))]
    pub async fn handle(&self, task: &TaskEnvelope) -> Result<(), HandlerError> {
        match task.kind {
            TaskKind::AddStudentGrade => {
                let grade: NewCourseGrade = serde_json::from_value(task.payload.clone())?;
                self.repository.insert_course_grade(grade).await?;
            }
            TaskKind::AddStudentGradeTask => {
                let grade: NewTaskGrade = serde_json::from_value(task.payload.clone())?;
                self.write_task_grade(grade).await?;
            }
        }
        Ok(())
    }

    async fn write_task_grade(&self, grade: NewTaskGrade) -> Result<(), StoreError> {
        match self.policy {
            TaskGradeWritePolicy::AlwaysInsert => self.repository.insert_task_grade(grade).await,
            TaskGradeWritePolicy::Upsert => {
                let write = self.repository.upsert_task_grade(grade).await?;
                debug!("Task grade {:?}", write);
                Ok(())
            }
        }
    }
}

/// Exponential backoff for failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// `base_delay * 2^retried`, capped at one hour.
    pub fn backoff(&self, retried: u32) -> Duration {
        2u32.checked_pow(retried)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 25,
            base_delay: Duration::from_secs(10),
        }
    }
}

/// Claims due tasks and runs them with bounded concurrency.
pub struct WorkerPool {
    source: Arc<dyn TaskSource>,
    handler: GradeTaskHandler,
    concurrency: usize,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl WorkerPool {
    pub fn new(
        source: Arc<dyn TaskSource>,
        handler: GradeTaskHandler,
        concurrency: usize,
        poll_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        WorkerPool {
            source,
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
            retry,
        }
    }

    /// Polls until `shutdown` resolves, then waits for in-flight tasks to finish.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);

        info!(
            "Worker pool started (concurrency {}, poll interval {}ms)",
            self.concurrency,
            self.poll_interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Worker task panicked: {}", e);
                }
            }

            let available = semaphore.available_permits();
            if available == 0 {
                continue;
            }

            let tasks = match self.source.claim_due(available).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!("Failed to claim due tasks: {}", e);
                    continue;
                }
            };

            for task in tasks {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let source = self.source.clone();
                let handler = self.handler.clone();
                let retry = self.retry;

                in_flight.spawn(async move {
                    let _permit = permit;
                    if let Err(e) = execute(source.as_ref(), &handler, retry, task).await {
                        error!(
                            "Failed to record task outcome, redelivered after its lease: {}",
                            e
                        );
                    }
                });
            }
        }

        info!("Shutting down, draining {} in-flight task(s)", in_flight.len());
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Worker task panicked: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

/// Runs one task, then acks it, reschedules it or buries it.
pub async fn execute(
    source: &dyn TaskSource,
    handler: &GradeTaskHandler,
    retry: RetryPolicy,
    mut task: TaskEnvelope,
) -> Result<(), QueueError> {
    let err = match handler.handle(&task).await {
        Ok(()) => {
            info!("Processed task {} ({})", task.id, task.kind.as_str());
            return source.ack(&task).await;
        }
        Err(e) => e,
    };

    if !err.is_retryable() || task.retried >= retry.max_retries {
        return source.bury(task, &err.to_string()).await;
    }

    let delay = retry.backoff(task.retried);
    warn!(
        "Task {} ({}) failed, retrying in {}s: {}",
        task.id,
        task.kind.as_str(),
        delay.as_secs(),
        err
    );
    task.retried += 1;
    source.retry(task, delay).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_retries: 25,
            base_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(10));
        assert_eq!(policy.backoff(1), Duration::from_secs(20));
        assert_eq!(policy.backoff(3), Duration::from_secs(80));
        assert_eq!(policy.backoff(12), MAX_BACKOFF);
        assert_eq!(policy.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn decode_failures_are_not_retried() {
        let decode = serde_json::from_str::<NewCourseGrade>("{}").unwrap_err();
        assert!(!HandlerError::Payload(decode).is_retryable());
        assert!(!HandlerError::Store(StoreError::InvalidGrade(f64::NAN)).is_retryable());
        assert!(HandlerError::Store(StoreError::Interact("down".to_string())).is_retryable());
    }
}
