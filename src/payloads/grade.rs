use crate::model::grade::{NewCourseGrade, NewTaskGrade};
use chrono::{DateTime, Utc};
use serde::Deserialize;

fn default_on_time() -> bool {
    true
}

#[derive(Deserialize, Debug)]
pub struct SubmitCourseGradePayload {
    pub student_id: String,
    pub course_id: String,
    pub grade: f64,
    #[serde(default = "default_on_time")]
    pub on_time: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug)]
pub struct SubmitTaskGradePayload {
    pub student_id: String,
    pub course_id: String,
    pub task_id: String,
    pub grade: f64,
    #[serde(default = "default_on_time")]
    pub on_time: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<SubmitCourseGradePayload> for NewCourseGrade {
    fn from(payload: SubmitCourseGradePayload) -> Self {
        NewCourseGrade {
            student_id: payload.student_id,
            course_id: payload.course_id,
            grade: payload.grade,
            on_time: payload.on_time,
            created_at: payload.created_at,
        }
    }
}

impl From<SubmitTaskGradePayload> for NewTaskGrade {
    fn from(payload: SubmitTaskGradePayload) -> Self {
        NewTaskGrade {
            student_id: payload.student_id,
            course_id: payload.course_id,
            task_id: payload.task_id,
            grade: payload.grade,
            on_time: payload.on_time,
            created_at: payload.created_at,
        }
    }
}
