use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

mod common;

async fn post_json(
    app: &axum::Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

async fn get_json(
    app: &axum::Router,
    uri: &str,
    token: &str,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn submit_scores_last_recorded_answers() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let student_id = format!("student-{}", Uuid::new_v4());
    let token = common::bearer_token(&app, &student_id, "student");
    let course_id = common::seed_course(&app, "teacher-x").await;
    let exam_id = common::seed_exam(&app, &course_id, 3).await;

    let (status, started) = post_json(
        &app.router,
        &format!("/api/v1/student-programs/exams/{}/start", exam_id),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", started);
    let attempt_id = started["attempt_id"].as_str().unwrap().to_string();
    assert_eq!(started["attempt_number"], 1);
    assert_eq!(started["tab_switch_count"], 0);
    // Correct-choice flags must never reach the client
    assert!(!started.to_string().contains("is_correct"));

    let answer_uri = format!(
        "/api/v1/student-programs/exams/attempt/{}/answer",
        attempt_id
    );
    // First pick the wrong choice for q1, then re-answer with the right
    // one: only the last answer may count.
    let (status, _) = post_json(
        &app.router,
        &answer_uri,
        &token,
        json!({ "question_id": "q1", "choice_id": "q1-wrong" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(
        &app.router,
        &answer_uri,
        &token,
        json!({ "question_id": "q1", "choice_id": "q1-right" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(
        &app.router,
        &answer_uri,
        &token,
        json!({ "question_id": "q2", "choice_id": "q2-wrong" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, submitted) = post_json(
        &app.router,
        &format!(
            "/api/v1/student-programs/exams/attempt/{}/submit",
            attempt_id
        ),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "submit failed: {}", submitted);
    assert_eq!(submitted["score"], 5);
    assert_eq!(submitted["total_points"], 15);
    let percentage = submitted["percentage"].as_f64().unwrap();
    assert!((percentage - 33.333333333333336).abs() < 0.01);

    // Result breakdown reflects the submitted attempt
    let (status, result) = get_json(
        &app.router,
        &format!(
            "/api/v1/student-programs/exams/attempt/{}/result",
            attempt_id
        ),
        &token,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "submitted");
    assert_eq!(result["score"], 5);
    assert_eq!(result["passed"], false);
    assert_eq!(result["questions"][0]["earned_points"], 5);
    assert_eq!(result["questions"][1]["earned_points"], 0);
}

#[tokio::test]
async fn start_resumes_open_attempt_and_rejects_completed() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let student_id = format!("student-{}", Uuid::new_v4());
    let token = common::bearer_token(&app, &student_id, "student");
    let course_id = common::seed_course(&app, "teacher-x").await;
    let exam_id = common::seed_exam(&app, &course_id, 3).await;
    let start_uri = format!("/api/v1/student-programs/exams/{}/start", exam_id);

    let (status, first) = post_json(&app.router, &start_uri, &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = post_json(&app.router, &start_uri, &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["attempt_id"], second["attempt_id"]);
    assert_eq!(second["attempt_number"], 1);

    let attempt_id = first["attempt_id"].as_str().unwrap();
    let (status, _) = post_json(
        &app.router,
        &format!(
            "/api/v1/student-programs/exams/attempt/{}/submit",
            attempt_id
        ),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same (exam, student, session) after submission: conflict
    let (status, body) = post_json(&app.router, &start_uri, &token, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT, "body: {}", body);

    // Second submit is also a conflict
    let (status, _) = post_json(
        &app.router,
        &format!(
            "/api/v1/student-programs/exams/attempt/{}/submit",
            attempt_id
        ),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn tab_switches_flag_at_threshold_but_allow_submit() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let student_id = format!("student-{}", Uuid::new_v4());
    let token = common::bearer_token(&app, &student_id, "student");
    let course_id = common::seed_course(&app, "teacher-x").await;
    let exam_id = common::seed_exam(&app, &course_id, 3).await;

    let (_, started) = post_json(
        &app.router,
        &format!("/api/v1/student-programs/exams/{}/start", exam_id),
        &token,
        json!({}),
    )
    .await;
    let attempt_id = started["attempt_id"].as_str().unwrap();
    let switch_uri = format!(
        "/api/v1/student-programs/exams/attempt/{}/tab-switch",
        attempt_id
    );

    for expected_count in 1..=2 {
        let (status, body) = post_json(&app.router, &switch_uri, &token, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tab_switch_count"], expected_count);
        assert_eq!(body["flagged"], false);
    }

    // Third switch crosses max_tab_switch = 3
    let (status, body) = post_json(&app.router, &switch_uri, &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tab_switch_count"], 3);
    assert_eq!(body["flagged"], true);

    // The flag is monotonic
    let (_, body) = post_json(&app.router, &switch_uri, &token, json!({})).await;
    assert_eq!(body["tab_switch_count"], 4);
    assert_eq!(body["flagged"], true);

    // Flagged attempts can still answer and submit
    let (status, _) = post_json(
        &app.router,
        &format!(
            "/api/v1/student-programs/exams/attempt/{}/answer",
            attempt_id
        ),
        &token,
        json!({ "question_id": "q1", "choice_id": "q1-right" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, submitted) = post_json(
        &app.router,
        &format!(
            "/api/v1/student-programs/exams/attempt/{}/submit",
            attempt_id
        ),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["score"], 5);
}

#[tokio::test]
async fn unpublished_exam_is_not_found() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let student_id = format!("student-{}", Uuid::new_v4());
    let token = common::bearer_token(&app, &student_id, "student");

    let exam_id = format!("exam-{}", Uuid::new_v4());
    app.mongo
        .collection::<mongodb::bson::Document>("exams")
        .insert_one(mongodb::bson::doc! {
            "_id": &exam_id,
            "course_id": "course-x",
            "program_id": null,
            "title": "Draft",
            "total_points": 10,
            "time_limit_minutes": 30,
            "max_tab_switch": 3,
            "is_published": false,
            "questions": [],
            "created_at": mongodb::bson::to_bson(&chrono::Utc::now()).unwrap(),
        })
        .await
        .unwrap();

    let (status, _) = post_json(
        &app.router,
        &format!("/api/v1/student-programs/exams/{}/start", exam_id),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn attempts_are_not_visible_to_other_students() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let owner = format!("student-{}", Uuid::new_v4());
    let owner_token = common::bearer_token(&app, &owner, "student");
    let course_id = common::seed_course(&app, "teacher-x").await;
    let exam_id = common::seed_exam(&app, &course_id, 3).await;

    let (_, started) = post_json(
        &app.router,
        &format!("/api/v1/student-programs/exams/{}/start", exam_id),
        &owner_token,
        json!({}),
    )
    .await;
    let attempt_id = started["attempt_id"].as_str().unwrap();

    let intruder = format!("student-{}", Uuid::new_v4());
    let intruder_token = common::bearer_token(&app, &intruder, "student");
    let (status, _) = get_json(
        &app.router,
        &format!(
            "/api/v1/student-programs/exams/attempt/{}/result",
            attempt_id
        ),
        &intruder_token,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let Some(app) = common::create_test_app().await else {
        return;
    };

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/student-programs/exams/any/start")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
