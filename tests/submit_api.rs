use axum::http::StatusCode;
use grade_stats_service::model::grade::{EnqueueReceipt, NewCourseGrade, NewTaskGrade};
use grade_stats_service::queue::{DelayPolicy, TaskKind};
use grade_stats_service::response::ApiResponse;
use serde_json::{Value, json};
use std::time::Duration;

mod helpers;
use helpers::{setup_test_environment, setup_test_environment_with_delays};

// submit_course_grade

#[tokio::test]
async fn test_submit_course_grade_success() {
    let env = setup_test_environment();

    let response = env
        .server
        .post("/stats/student/grade")
        .json(&json!({
            "student_id": "s1",
            "course_id": "c1",
            "grade": 8.5,
            "on_time": false
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<EnqueueReceipt> = response.json();
    assert!(
        body.status_message
            .starts_with("Task task:add_student_grade queued successfully")
    );
    let receipt = body.data.unwrap();
    assert_eq!(receipt.task, "task:add_student_grade");
    assert!((30..=180).contains(&receipt.expected_delay_secs));

    let scheduled = env.queue.scheduled.lock().unwrap();
    assert_eq!(scheduled.len(), 1);
    let (task, delay) = &scheduled[0];
    assert_eq!(task.kind, TaskKind::AddStudentGrade);
    assert_eq!(task.id.to_string(), receipt.task_id);
    assert_eq!(delay.as_secs(), receipt.expected_delay_secs);

    let grade: NewCourseGrade = serde_json::from_value(task.payload.clone()).unwrap();
    assert_eq!(grade.student_id, "s1");
    assert_eq!(grade.course_id, "c1");
    assert_eq!(grade.grade, 8.5);
    assert!(!grade.on_time);
    assert!(grade.created_at.is_none());
}

#[tokio::test]
async fn test_submit_course_grade_eta_message() {
    let delays = DelayPolicy::new(Duration::from_secs(90), Duration::from_secs(90)).unwrap();
    let env = setup_test_environment_with_delays(delays);

    let response = env
        .server
        .post("/stats/student/grade")
        .json(&json!({"student_id": "s1", "course_id": "c1", "grade": 70}))
        .await;

    let body: ApiResponse<EnqueueReceipt> = response.json();
    assert_eq!(
        body.status_message,
        "Task task:add_student_grade queued successfully (Expected time to be processed: 1.50 minutes)"
    );
    assert_eq!(body.data.unwrap().expected_delay_secs, 90);
}

#[tokio::test]
async fn test_submit_course_grade_on_time_defaults_to_true() {
    let env = setup_test_environment();

    env.server
        .post("/stats/student/grade")
        .json(&json!({"student_id": "s1", "course_id": "c1", "grade": 5}))
        .await;

    let scheduled = env.queue.scheduled.lock().unwrap();
    let grade: NewCourseGrade = serde_json::from_value(scheduled[0].0.payload.clone()).unwrap();
    assert!(grade.on_time);
}

#[tokio::test]
async fn test_submit_course_grade_does_not_write_synchronously() {
    let env = setup_test_environment();

    env.server
        .post("/stats/student/grade")
        .json(&json!({"student_id": "s1", "course_id": "c1", "grade": 5}))
        .await;

    assert!(env.repository.course_grades.lock().unwrap().is_empty());
    assert_eq!(env.queue.scheduled_count(), 1);
}

#[tokio::test]
async fn test_submit_course_grade_missing_field() {
    let env = setup_test_environment();

    let response = env
        .server
        .post("/stats/student/grade")
        .json(&json!({"student_id": "s1", "grade": 5}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: ApiResponse<Value> = response.json();
    assert_eq!(body.status_code, 400);
    assert_eq!(env.queue.scheduled_count(), 0);
}

#[tokio::test]
async fn test_submit_course_grade_malformed_body() {
    let env = setup_test_environment();

    let response = env
        .server
        .post("/stats/student/grade")
        .text("grade=5")
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(env.queue.scheduled_count(), 0);
}

#[tokio::test]
async fn test_submit_course_grade_invalid_identifier() {
    let env = setup_test_environment();

    let response = env
        .server
        .post("/stats/student/grade")
        .json(&json!({"student_id": "s_1", "course_id": "c1", "grade": 5}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: ApiResponse<Value> = response.json();
    assert!(body.status_message.contains("student_id"));
    assert_eq!(env.queue.scheduled_count(), 0);
}

#[tokio::test]
async fn test_submit_course_grade_enqueue_failure() {
    let env = setup_test_environment();
    env.queue.fail_on_schedule();

    let response = env
        .server
        .post("/stats/student/grade")
        .json(&json!({"student_id": "s1", "course_id": "c1", "grade": 5}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: ApiResponse<Value> = response.json();
    assert_eq!(body.status_message, "Failed to enqueue task");
    assert!(!body.status_message.contains("os error"));
    assert!(!body.status_message.contains("10.0.0.5"));
}

// submit_task_grade

#[tokio::test]
async fn test_submit_task_grade_success() {
    let env = setup_test_environment();

    let response = env
        .server
        .post("/stats/student/task/grade")
        .json(&json!({
            "student_id": "s1",
            "course_id": "c1",
            "task_id": "t1",
            "grade": 9.5,
            "created_at": "2024-03-01T10:00:00Z"
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: ApiResponse<EnqueueReceipt> = response.json();
    assert!(
        body.status_message
            .starts_with("Task task:add_student_grade_task queued successfully")
    );

    let scheduled = env.queue.scheduled.lock().unwrap();
    let (task, _) = &scheduled[0];
    assert_eq!(task.kind, TaskKind::AddStudentGradeTask);
    let grade: NewTaskGrade = serde_json::from_value(task.payload.clone()).unwrap();
    assert_eq!(grade.task_id, "t1");
    assert_eq!(grade.grade, 9.5);
    assert!(grade.created_at.is_some());
}

#[tokio::test]
async fn test_submit_task_grade_missing_task_id() {
    let env = setup_test_environment();

    let response = env
        .server
        .post("/stats/student/task/grade")
        .json(&json!({"student_id": "s1", "course_id": "c1", "grade": 9}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_task_grade_invalid_task_id() {
    let env = setup_test_environment();

    let response = env
        .server
        .post("/stats/student/task/grade")
        .json(&json!({"student_id": "s1", "course_id": "c1", "task_id": "", "grade": 9}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(env.queue.scheduled_count(), 0);
}
