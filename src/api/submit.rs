use super::helper;
use crate::AppState;
use crate::errors::AppError;
use crate::model::grade::{EnqueueReceipt, NewCourseGrade, NewTaskGrade};
use crate::payloads::grade::{SubmitCourseGradePayload, SubmitTaskGradePayload};
use crate::queue::{Enqueuer, TaskKind};
use crate::response::ApiResponse;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::Json;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match payload {
        Ok(Json(payload)) => Ok(payload),
        Err(rejection) => {
            warn!("Rejected grade submission body: {}", rejection.body_text());
            Err(AppError::BadRequest(format!(
                "Invalid request body: {}",
                rejection.body_text()
            )))
        }
    }
}

async fn enqueue<P: Serialize + Sync>(
    enqueuer: &Enqueuer,
    kind: TaskKind,
    payload: &P,
) -> Result<ApiResponse<EnqueueReceipt>, AppError> {
    let enqueued = enqueuer.enqueue(kind, payload).await?;

    let message = format!(
        "Task {} queued successfully (Expected time to be processed: {:.2} minutes)",
        kind.as_str(),
        enqueued.delay.as_secs_f64() / 60.0
    );
    info!("{}", message);

    Ok(ApiResponse::ok_with_message(
        message,
        EnqueueReceipt {
            task: kind.as_str().to_string(),
            task_id: enqueued.task_id.to_string(),
            expected_delay_secs: enqueued.delay.as_secs(),
        },
    ))
}

/// Queues a course grade for a student.
///
/// Request Body: `SubmitCourseGradePayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `EnqueueReceipt` with the expected processing time in the status message (200 OK).
/// * `400 Bad Request`: If the body or an identifier is malformed, or the task could not be queued.
#[instrument(skip(state, payload))]
pub async fn submit_course_grade(
    State(state): State<AppState>,
    payload: Result<Json<SubmitCourseGradePayload>, JsonRejection>,
) -> Result<ApiResponse<EnqueueReceipt>, AppError> {
    let payload = body(payload)?;
    debug!("Course grade payload: {:?}", payload);

    helper::validate_identifiers(&[
        ("student_id", payload.student_id.as_str()),
        ("course_id", payload.course_id.as_str()),
    ])?;

    let grade = NewCourseGrade::from(payload);
    enqueue(&state.enqueuer, TaskKind::AddStudentGrade, &grade).await
}

/// Queues a task grade for a student.
///
/// Request Body: `SubmitTaskGradePayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `EnqueueReceipt` (200 OK).
/// * `400 Bad Request`: Same conditions as `submit_course_grade`.
#[instrument(skip(state, payload))]
pub async fn submit_task_grade(
    State(state): State<AppState>,
    payload: Result<Json<SubmitTaskGradePayload>, JsonRejection>,
) -> Result<ApiResponse<EnqueueReceipt>, AppError> {
    let payload = body(payload)?;
    debug!("Task grade payload: {:?}", payload);

    helper::validate_identifiers(&[
        ("student_id", payload.student_id.as_str()),
        ("course_id", payload.course_id.as_str()),
        ("task_id", payload.task_id.as_str()),
    ])?;

    let grade = NewTaskGrade::from(payload);
    enqueue(&state.enqueuer, TaskKind::AddStudentGradeTask, &grade).await
}
