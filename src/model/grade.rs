use crate::schema::grades;
use crate::schema::grades_tasks;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable};
use serde::{Deserialize, Serialize};

fn default_on_time() -> bool {
    true
}

// Goes through the shortest decimal text of the float, so 80.1 is stored as 80.1
// and not as the exact binary expansion.
fn grade_to_decimal(grade: f64) -> Option<BigDecimal> {
    if !grade.is_finite() {
        return None;
    }
    grade.to_string().parse().ok()
}

/// A course grade submission, as carried on the queue and written by the worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewCourseGrade {
    pub student_id: String,
    pub course_id: String,
    pub grade: f64,
    #[serde(default = "default_on_time")]
    pub on_time: bool,
    // None lets the store assign CURRENT_TIMESTAMP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A task grade submission for a (student, course, task) triple.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewTaskGrade {
    pub student_id: String,
    pub course_id: String,
    pub task_id: String,
    pub grade: f64,
    #[serde(default = "default_on_time")]
    pub on_time: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = grades)]
pub struct CourseGradeRecord {
    pub student_id: String,
    pub course_id: String,
    pub grade: BigDecimal,
    pub on_time: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = grades_tasks)]
pub struct TaskGradeRecord {
    pub student_id: String,
    pub course_id: String,
    pub task_id: String,
    pub grade: BigDecimal,
    pub on_time: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewCourseGrade {
    /// Converts into an insertable row. Returns `None` when the grade is not finite.
    pub fn to_record(&self) -> Option<CourseGradeRecord> {
        Some(CourseGradeRecord {
            student_id: self.student_id.clone(),
            course_id: self.course_id.clone(),
            grade: grade_to_decimal(self.grade)?,
            on_time: self.on_time,
            created_at: self.created_at,
        })
    }
}

impl NewTaskGrade {
    /// Converts into an insertable row. Returns `None` when the grade is not finite.
    pub fn to_record(&self) -> Option<TaskGradeRecord> {
        Some(TaskGradeRecord {
            student_id: self.student_id.clone(),
            course_id: self.course_id.clone(),
            task_id: self.task_id.clone(),
            grade: grade_to_decimal(self.grade)?,
            on_time: self.on_time,
            created_at: self.created_at,
        })
    }
}

/// A stored `grades` row. The service only aggregates over these; integration
/// tests load them to check what was written.
#[derive(Queryable, Debug, Clone)]
pub struct CourseGrade {
    pub id: i64,
    pub student_id: String,
    pub course_id: String,
    pub grade: BigDecimal,
    pub on_time: bool,
    pub created_at: DateTime<Utc>,
}

/// A stored `grades_tasks` row, loaded by integration tests.
#[derive(Queryable, Debug, Clone)]
pub struct TaskGrade {
    pub id: i64,
    pub student_id: String,
    pub course_id: String,
    pub task_id: String,
    pub grade: BigDecimal,
    pub on_time: bool,
    pub created_at: DateTime<Utc>,
}

/// Returned to the submitter once a grade has been queued.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnqueueReceipt {
    pub task: String,
    pub task_id: String,
    pub expected_delay_secs: u64,
}
