use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

mod common;

async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn join_requires_active_enrollment() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let teacher_id = format!("teacher-{}", Uuid::new_v4());
    let course_id = common::seed_course(&app, &teacher_id).await;
    let session_id = common::seed_past_class_sessions(&app, &course_id, 1)
        .await
        .remove(0);

    let outsider = format!("student-{}", Uuid::new_v4());
    let outsider_token = common::bearer_token(&app, &outsider, "student");
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/v1/attendance/sessions/{}/join", session_id),
        &outsider_token,
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let student = format!("student-{}", Uuid::new_v4());
    common::seed_enrollment(&app, &student, &course_id).await;
    let student_token = common::bearer_token(&app, &student, "student");
    let (status, body) = request(
        &app.router,
        "POST",
        &format!("/api/v1/attendance/sessions/{}/join", session_id),
        &student_token,
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    // Joining twice is an upsert, not a duplicate
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/v1/attendance/sessions/{}/join", session_id),
        &student_token,
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let count = app
        .mongo
        .collection::<mongodb::bson::Document>("session_attendance")
        .count_documents(mongodb::bson::doc! {
            "session_id": &session_id,
            "student_id": &student,
        })
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn batch_marking_is_teacher_only_and_overwrites_auto_marks() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let teacher_id = format!("teacher-{}", Uuid::new_v4());
    let course_id = common::seed_course(&app, &teacher_id).await;
    let session_id = common::seed_past_class_sessions(&app, &course_id, 1)
        .await
        .remove(0);

    let student = format!("student-{}", Uuid::new_v4());
    common::seed_enrollment(&app, &student, &course_id).await;
    common::seed_present_attendance(&app, &session_id, &student).await;

    // A different teacher does not own this course
    let other_teacher = common::bearer_token(&app, "someone-else", "teacher");
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/v1/attendance/sessions/{}/batch", session_id),
        &other_teacher,
        Some(json!({ "records": [ { "student_id": student, "status": "absent" } ] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The owning teacher overrides the auto mark
    let teacher_token = common::bearer_token(&app, &teacher_id, "teacher");
    let (status, body) = request(
        &app.router,
        "POST",
        &format!("/api/v1/attendance/sessions/{}/batch", session_id),
        &teacher_token,
        Some(json!({ "records": [ { "student_id": student, "status": "absent" } ] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["updated"], 1);

    let (status, roster) = request(
        &app.router,
        "GET",
        &format!("/api/v1/attendance/sessions/{}", session_id),
        &teacher_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entry = roster["entries"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["student_id"] == student.as_str())
        .expect("student missing from roster");
    assert_eq!(entry["status"], "absent");
    assert_eq!(entry["marked_by"], "teacher");

    // Empty batches are rejected before touching the database
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/v1/attendance/sessions/{}/batch", session_id),
        &teacher_token,
        Some(json!({ "records": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn course_grade_combines_exams_and_attendance() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let teacher_id = format!("teacher-{}", Uuid::new_v4());
    let course_id = common::seed_course(&app, &teacher_id).await;
    let student = format!("student-{}", Uuid::new_v4());
    common::seed_enrollment(&app, &student, &course_id).await;

    // 10 past class sessions, present in 7 -> attendance 70%
    let sessions = common::seed_past_class_sessions(&app, &course_id, 10).await;
    for session_id in sessions.iter().take(7) {
        common::seed_present_attendance(&app, session_id, &student).await;
    }

    // One 15-point exam with a submitted score of 12 -> exam average 80%
    let exam_id = common::seed_exam(&app, &course_id, 3).await;
    common::seed_submitted_attempt(&app, &exam_id, &student, 1, 12).await;

    let student_token = common::bearer_token(&app, &student, "student");
    let (status, grade) = request(
        &app.router,
        "POST",
        &format!("/api/v1/grades/calculate/course/{}", course_id),
        &student_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", grade);

    // 80 * 0.7 + 70 * 0.3 = 77 -> C+ / 2.3
    assert!((grade["exam_score"].as_f64().unwrap() - 80.0).abs() < 0.01);
    assert!((grade["attendance_score"].as_f64().unwrap() - 70.0).abs() < 0.01);
    assert!((grade["final_grade"].as_f64().unwrap() - 77.0).abs() < 0.01);
    assert_eq!(grade["letter_grade"], "C+");
    assert!((grade["gpa"].as_f64().unwrap() - 2.3).abs() < 1e-9);

    // Recalculating over unchanged data is idempotent
    let (_, again) = request(
        &app.router,
        "POST",
        &format!("/api/v1/grades/calculate/course/{}", course_id),
        &student_token,
        None,
    )
    .await;
    assert_eq!(grade["_id"], again["_id"]);
    assert_eq!(grade["final_grade"], again["final_grade"]);
    assert_eq!(grade["letter_grade"], again["letter_grade"]);

    // Exactly one derived row for the pair
    let rows = app
        .mongo
        .collection::<mongodb::bson::Document>("grade_calculations")
        .count_documents(mongodb::bson::doc! {
            "student_id": &student,
            "course_id": &course_id,
        })
        .await
        .unwrap();
    assert_eq!(rows, 1);

    // The grade list endpoint returns the persisted row
    let (status, grades) = request(
        &app.router,
        "GET",
        &format!("/api/v1/grades/student/{}", student),
        &student_token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(grades.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn students_cannot_recalculate_for_others() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let student = format!("student-{}", Uuid::new_v4());
    let token = common::bearer_token(&app, &student, "student");

    let (status, _) = request(
        &app.router,
        "POST",
        "/api/v1/grades/calculate/course/any-course",
        &token,
        Some(json!({ "student_id": "someone-else" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app.router,
        "POST",
        "/api/v1/grades/calculate/all/someone-else",
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn grade_for_unenrolled_student_is_not_found() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let student = format!("student-{}", Uuid::new_v4());
    let token = common::bearer_token(&app, &student, "student");
    let teacher_id = format!("teacher-{}", Uuid::new_v4());
    let course_id = common::seed_course(&app, &teacher_id).await;

    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/v1/grades/calculate/course/{}", course_id),
        &token,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
