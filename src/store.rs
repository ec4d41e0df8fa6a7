use crate::model::grade::{NewCourseGrade, NewTaskGrade};
use crate::model::stats::{
    Average, BucketAverage, GradeScope, OnTimeScope, OnTimeStats, StudentAverage, TimeBucket,
    TimeRange,
};
use async_trait::async_trait;
use deadpool_diesel::postgres::PoolError;
use thiserror::Error;

mod postgres;

pub use postgres::PgGradeStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("database interaction error: {0}")]
    Interact(String),

    #[error("database query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("grade {0} cannot be stored")]
    InvalidGrade(f64),
}

/// Outcome of an upsert of a task grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskGradeWrite {
    Inserted,
    Updated(usize),
}

/// Persistence and aggregate reads over course and task grades.
///
/// Every method opens and closes its own transaction; nothing is held
/// across calls. Implementations must be cheap to share behind an `Arc`.
#[async_trait]
pub trait GradeRepository: Send + Sync {
    async fn insert_course_grade(&self, grade: NewCourseGrade) -> Result<(), StoreError>;

    async fn insert_task_grade(&self, grade: NewTaskGrade) -> Result<(), StoreError>;

    /// Overwrites grade, on-time flag and timestamp for the grade's
    /// (student, course, task) triple. Returns the number of rows updated.
    async fn update_task_grade(&self, grade: NewTaskGrade) -> Result<usize, StoreError>;

    /// Inserts the grade, or overwrites the existing row of its (student, course, task)
    /// triple. Check and write share one transaction, serialized per triple.
    async fn upsert_task_grade(&self, grade: NewTaskGrade) -> Result<TaskGradeWrite, StoreError>;

    async fn task_grade_exists(
        &self,
        student_id: &str,
        course_id: &str,
        task_id: &str,
    ) -> Result<bool, StoreError>;

    async fn average_for_student_in_course(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<Average, StoreError>;

    /// Course grades grouped by truncated `created_at`, ascending by bucket.
    async fn averages_over_time(
        &self,
        scope: GradeScope,
        range: TimeRange,
        bucket: TimeBucket,
    ) -> Result<Vec<BucketAverage>, StoreError>;

    async fn average_task_grade_for_student(
        &self,
        student_id: &str,
        course_id: &str,
        task_id: &str,
    ) -> Result<Average, StoreError>;

    async fn student_course_task_average(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<Average, StoreError>;

    /// Per-student task averages in a course, excluding one student, best first.
    async fn other_students_course_averages(
        &self,
        exclude_student_id: &str,
        course_id: &str,
    ) -> Result<Vec<StudentAverage>, StoreError>;

    /// Per-student averages on one task, best first.
    async fn averages_for_task(
        &self,
        course_id: &str,
        task_id: &str,
    ) -> Result<Vec<StudentAverage>, StoreError>;

    /// One `AllTime` row without a bucket, otherwise one row per bucket.
    async fn on_time_percentage(
        &self,
        scope: OnTimeScope,
        range: TimeRange,
        bucket: Option<TimeBucket>,
    ) -> Result<Vec<OnTimeStats>, StoreError>;
}
