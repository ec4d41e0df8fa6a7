use super::helper;
use crate::AppState;
use crate::errors::AppError;
use crate::model::stats::{
    Average, AveragesOverTimeResponse, GradeScope, OnTimePercentageResponse, OnTimeScope,
    StudentCourseAverageResponse, StudentTaskAverageResponse, StudentTaskAveragesResponse,
    TaskAveragesResponse, TimeBucket, weighted_group_average,
};
use crate::payloads::stats::TimeRangeParams;
use crate::response::ApiResponse;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use tracing::{debug, info, instrument, warn};

/// Average course grade of a student.
///
/// Returns (wrapped in `ApiResponse`)
/// * `StudentCourseAverageResponse` (200 OK).
/// * `400 Bad Request`: If an identifier is malformed.
/// * `404 Not Found`: If the student has no grades in the course.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state))]
pub async fn get_student_course_average(
    State(state): State<AppState>,
    Path((student_id, course_id)): Path<(String, String)>,
) -> Result<ApiResponse<StudentCourseAverageResponse>, AppError> {
    helper::validate_identifiers(&[
        ("student_id", student_id.as_str()),
        ("course_id", course_id.as_str()),
    ])?;
    info!(
        "Fetching average grade for student {} in course {}",
        student_id, course_id
    );

    match state
        .repository
        .average_for_student_in_course(&student_id, &course_id)
        .await?
    {
        Average::Found(average_grade) => Ok(ApiResponse::ok(StudentCourseAverageResponse {
            student_id,
            course_id,
            average_grade,
        })),
        Average::NotFound => {
            warn!(
                "No grades found for student {} in course {}",
                student_id, course_id
            );
            Err(AppError::NotFound(format!(
                "No grades found for student {} in course {}",
                student_id, course_id
            )))
        }
    }
}

/// Average grade of a student on one task.
///
/// Returns (wrapped in `ApiResponse`)
/// * `StudentTaskAverageResponse` (200 OK).
/// * `400 Bad Request`: If an identifier is malformed.
/// * `404 Not Found`: If the student has no grades for the task.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state))]
pub async fn get_student_task_average(
    State(state): State<AppState>,
    Path((student_id, course_id, task_id)): Path<(String, String, String)>,
) -> Result<ApiResponse<StudentTaskAverageResponse>, AppError> {
    helper::validate_identifiers(&[
        ("student_id", student_id.as_str()),
        ("course_id", course_id.as_str()),
        ("task_id", task_id.as_str()),
    ])?;
    info!(
        "Fetching average grade for student {} on task {} of course {}",
        student_id, task_id, course_id
    );

    let average = state
        .repository
        .average_task_grade_for_student(&student_id, &course_id, &task_id)
        .await?;

    let Some(average_grade) = average.found() else {
        warn!(
            "No grades found for student {} on task {} of course {}",
            student_id, task_id, course_id
        );
        return Err(AppError::NotFound(format!(
            "No grades found for student {} on task {} in course {}",
            student_id, task_id, course_id
        )));
    };

    Ok(ApiResponse::ok(StudentTaskAverageResponse {
        student_id,
        course_id,
        task_id,
        average_grade,
    }))
}

async fn averages_over_time(
    state: &AppState,
    scope: GradeScope,
    params: &TimeRangeParams,
) -> Result<AveragesOverTimeResponse, AppError> {
    let time_range = helper::parse_time_range(params)?;
    let group_by = helper::parse_group_by(params)?.unwrap_or(TimeBucket::Day);
    debug!("Range {:?}, grouped by {}", time_range, group_by);

    let averages = state
        .repository
        .averages_over_time(scope.clone(), time_range, group_by)
        .await?;
    info!("Computed {} {} bucket(s)", averages.len(), group_by);

    let (student_id, course_id) = match scope {
        GradeScope::Student(id) => (Some(id), None),
        GradeScope::Course(id) => (None, Some(id)),
    };

    Ok(AveragesOverTimeResponse {
        student_id,
        course_id,
        averages,
        time_range,
        group_by,
    })
}

/// Course grades of a student averaged per time bucket.
///
/// Query Parameters: `TimeRangeParams` (`group_by` defaults to `day`)
///
/// Returns (wrapped in `ApiResponse`)
/// * `AveragesOverTimeResponse`, buckets ascending (200 OK).
/// * `400 Bad Request`: If the id, a date or `group_by` is malformed.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state, params))]
pub async fn get_student_averages_over_time(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    params: Result<Query<TimeRangeParams>, QueryRejection>,
) -> Result<ApiResponse<AveragesOverTimeResponse>, AppError> {
    let params = helper::query(params)?;
    helper::validate_identifier("student_id", &student_id)?;
    info!("Fetching averages over time for student {}", student_id);

    let response = averages_over_time(&state, GradeScope::Student(student_id), &params).await?;
    Ok(ApiResponse::ok(response))
}

/// Course grades of every student in a course averaged per time bucket.
///
/// Same contract as `get_student_averages_over_time`.
#[instrument(skip(state, params))]
pub async fn get_course_averages_over_time(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    params: Result<Query<TimeRangeParams>, QueryRejection>,
) -> Result<ApiResponse<AveragesOverTimeResponse>, AppError> {
    let params = helper::query(params)?;
    helper::validate_identifier("course_id", &course_id)?;
    info!("Fetching averages over time for course {}", course_id);

    let response = averages_over_time(&state, GradeScope::Course(course_id), &params).await?;
    Ok(ApiResponse::ok(response))
}

/// A student's average over all task grades of a course, next to the other students'.
///
/// Returns (wrapped in `ApiResponse`)
/// * `StudentTaskAveragesResponse` (200 OK). When the student has no task grades,
///   `student_average` is null and `warning` says so.
/// * `400 Bad Request`: If an identifier is malformed.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state))]
pub async fn get_student_task_averages(
    State(state): State<AppState>,
    Path((student_id, course_id)): Path<(String, String)>,
) -> Result<ApiResponse<StudentTaskAveragesResponse>, AppError> {
    helper::validate_identifiers(&[
        ("student_id", student_id.as_str()),
        ("course_id", course_id.as_str()),
    ])?;
    info!(
        "Fetching task averages for student {} against peers in course {}",
        student_id, course_id
    );

    let student_average = state
        .repository
        .student_course_task_average(&student_id, &course_id)
        .await?;
    let other_students = state
        .repository
        .other_students_course_averages(&student_id, &course_id)
        .await?;

    let warning = match student_average {
        Average::Found(_) => None,
        Average::NotFound => {
            warn!(
                "No task grades found for student {} in course {}",
                student_id, course_id
            );
            Some(format!(
                "No grades found for student {} in course {}",
                student_id, course_id
            ))
        }
    };

    Ok(ApiResponse::ok(StudentTaskAveragesResponse {
        student_id,
        course_id,
        student_average: student_average.found(),
        other_students,
        warning,
    }))
}

/// Per-student averages for one task plus the count-weighted group average.
///
/// Returns (wrapped in `ApiResponse`)
/// * `TaskAveragesResponse`, students best first; `group_average` is 0 with no rows (200 OK).
/// * `400 Bad Request`: If an identifier is malformed.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state))]
pub async fn get_task_averages(
    State(state): State<AppState>,
    Path((course_id, task_id)): Path<(String, String)>,
) -> Result<ApiResponse<TaskAveragesResponse>, AppError> {
    helper::validate_identifiers(&[
        ("course_id", course_id.as_str()),
        ("task_id", task_id.as_str()),
    ])?;
    info!(
        "Fetching per-student averages for task {} in course {}",
        task_id, course_id
    );

    let students = state
        .repository
        .averages_for_task(&course_id, &task_id)
        .await?;
    let group_average = weighted_group_average(&students);
    debug!(
        "{} student(s), group average {}",
        students.len(),
        group_average
    );

    Ok(ApiResponse::ok(TaskAveragesResponse {
        course_id,
        task_id,
        students,
        group_average,
    }))
}

async fn on_time_percentage(
    state: &AppState,
    scope: OnTimeScope,
    params: &TimeRangeParams,
) -> Result<OnTimePercentageResponse, AppError> {
    let time_range = helper::parse_time_range(params)?;
    let group_by = helper::parse_group_by(params)?;

    let stats = state
        .repository
        .on_time_percentage(scope.clone(), time_range, group_by)
        .await?;
    info!("Computed {} on-time row(s)", stats.len());

    let (course_id, student_id) = match scope {
        OnTimeScope::Course { course_id } => (course_id, None),
        OnTimeScope::CourseStudent {
            course_id,
            student_id,
        } => (course_id, Some(student_id)),
    };

    Ok(OnTimePercentageResponse {
        course_id,
        student_id,
        stats,
        time_range,
        group_by,
    })
}

/// Share of on-time task submissions in a course.
///
/// Query Parameters: `TimeRangeParams` (without `group_by` a single `all_time` row is returned)
///
/// Returns (wrapped in `ApiResponse`)
/// * `OnTimePercentageResponse` (200 OK).
/// * `400 Bad Request`: If the id, a date or `group_by` is malformed.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state, params))]
pub async fn get_course_on_time_percentage(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    params: Result<Query<TimeRangeParams>, QueryRejection>,
) -> Result<ApiResponse<OnTimePercentageResponse>, AppError> {
    let params = helper::query(params)?;
    helper::validate_identifier("course_id", &course_id)?;
    info!("Fetching on-time percentage for course {}", course_id);

    let response = on_time_percentage(&state, OnTimeScope::Course { course_id }, &params).await?;
    Ok(ApiResponse::ok(response))
}

/// Share of on-time task submissions of one student in a course.
///
/// Same contract as `get_course_on_time_percentage`.
#[instrument(skip(state, params))]
pub async fn get_student_on_time_percentage(
    State(state): State<AppState>,
    Path((course_id, student_id)): Path<(String, String)>,
    params: Result<Query<TimeRangeParams>, QueryRejection>,
) -> Result<ApiResponse<OnTimePercentageResponse>, AppError> {
    let params = helper::query(params)?;
    helper::validate_identifiers(&[
        ("course_id", course_id.as_str()),
        ("student_id", student_id.as_str()),
    ])?;
    info!(
        "Fetching on-time percentage for student {} in course {}",
        student_id, course_id
    );

    let scope = OnTimeScope::CourseStudent {
        course_id,
        student_id,
    };
    let response = on_time_percentage(&state, scope, &params).await?;
    Ok(ApiResponse::ok(response))
}
