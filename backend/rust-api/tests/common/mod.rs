#![allow(dead_code)]

use axum::Router;
use campushub_api::middlewares::auth::{JwtClaims, JwtService};
use campushub_api::{config::Config, create_router, services::AppState};
use chrono::{Duration, Utc};
use mongodb::bson::doc;
use std::sync::Arc;
use uuid::Uuid;

pub struct TestApp {
    pub router: Router,
    pub mongo: mongodb::Database,
    pub jwt_secret: String,
}

/// Build the app against the test databases. Returns None (and the test
/// should bail out) when no test database is configured, so the suite can
/// run in environments without MongoDB/Redis.
pub async fn create_test_app() -> Option<TestApp> {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    // Load test environment from .env.test
    dotenvy::from_filename(".env.test").ok();

    // The fixed-window limiter would throttle test loops
    std::env::set_var("RATE_LIMIT_DISABLED", "1");

    if std::env::var("MONGO_URI").is_err() || std::env::var("REDIS_URI").is_err() {
        eprintln!("Skipping integration test: MONGO_URI/REDIS_URI not configured");
        return None;
    }

    // Load test configuration
    let config = Config::load().expect("Failed to load test configuration");

    // Connect to test databases
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");

    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create test Redis client");

    let jwt_secret = config.jwt_secret.clone();
    let mongo = mongo_client.database(&config.mongo_database);

    // Create app state (connection is established inside)
    let app_state = Arc::new(
        AppState::new(config, mongo_client, redis_client)
            .await
            .expect("Failed to initialize test app state"),
    );

    // Build test router (same as main app)
    let router = create_router(app_state);

    Some(TestApp {
        router,
        mongo,
        jwt_secret,
    })
}

pub fn bearer_token(app: &TestApp, user_id: &str, role: &str) -> String {
    let service = JwtService::new(&app.jwt_secret);
    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: (now + 3600) as usize,
        iat: now as usize,
    };
    service.generate_token(claims).expect("Failed to sign test token")
}

/// Insert a published two-question exam (5 + 10 points) for a course and
/// return its id. Choice ids are fixed so tests can answer by id.
pub async fn seed_exam(app: &TestApp, course_id: &str, max_tab_switch: i32) -> String {
    let exam_id = format!("exam-{}", Uuid::new_v4());
    app.mongo
        .collection::<mongodb::bson::Document>("exams")
        .insert_one(doc! {
            "_id": &exam_id,
            "course_id": course_id,
            "program_id": null,
            "title": "Integration Midterm",
            "total_points": 15,
            "time_limit_minutes": 60,
            "max_tab_switch": max_tab_switch,
            "is_published": true,
            "questions": [
                {
                    "id": "q1",
                    "text": "2 + 2 = ?",
                    "points": 5,
                    "order": 1,
                    "choices": [
                        { "id": "q1-right", "text": "4", "is_correct": true },
                        { "id": "q1-wrong", "text": "5", "is_correct": false },
                    ],
                },
                {
                    "id": "q2",
                    "text": "Capital of France?",
                    "points": 10,
                    "order": 2,
                    "choices": [
                        { "id": "q2-wrong", "text": "Lyon", "is_correct": false },
                        { "id": "q2-right", "text": "Paris", "is_correct": true },
                    ],
                },
            ],
            "created_at": mongodb::bson::to_bson(&Utc::now()).unwrap(),
        })
        .await
        .expect("Failed to seed exam");
    exam_id
}

/// Insert a course owned by the given teacher and return its id.
pub async fn seed_course(app: &TestApp, teacher_id: &str) -> String {
    let course_id = format!("course-{}", Uuid::new_v4());
    app.mongo
        .collection::<mongodb::bson::Document>("courses")
        .insert_one(doc! {
            "_id": &course_id,
            "title": "Integration Course",
            "teacher_id": teacher_id,
            "program_id": null,
            "created_at": mongodb::bson::to_bson(&Utc::now()).unwrap(),
        })
        .await
        .expect("Failed to seed course");
    course_id
}

pub async fn seed_enrollment(app: &TestApp, student_id: &str, course_id: &str) {
    app.mongo
        .collection::<mongodb::bson::Document>("enrollments")
        .insert_one(doc! {
            "_id": format!("enr-{}", Uuid::new_v4()),
            "student_id": student_id,
            "course_id": course_id,
            "status": "active",
            "created_at": mongodb::bson::to_bson(&Utc::now()).unwrap(),
        })
        .await
        .expect("Failed to seed enrollment");
}

/// Insert `count` past class-type sessions for a course; returns their ids.
pub async fn seed_past_class_sessions(
    app: &TestApp,
    course_id: &str,
    count: usize,
) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let session_id = format!("sess-{}", Uuid::new_v4());
        let date = Utc::now() - Duration::days((i + 1) as i64);
        app.mongo
            .collection::<mongodb::bson::Document>("scheduled_sessions")
            .insert_one(doc! {
                "_id": &session_id,
                "course_id": course_id,
                "date": mongodb::bson::to_bson(&date).unwrap(),
                "session_type": "class",
                "lesson_id": null,
                "exam_id": null,
            })
            .await
            .expect("Failed to seed session");
        ids.push(session_id);
    }
    ids
}

pub async fn seed_present_attendance(app: &TestApp, session_id: &str, student_id: &str) {
    app.mongo
        .collection::<mongodb::bson::Document>("session_attendance")
        .insert_one(doc! {
            "_id": format!("att-{}", Uuid::new_v4()),
            "session_id": session_id,
            "student_id": student_id,
            "status": "present",
            "marked_by": "auto",
            "joined_at": mongodb::bson::to_bson(&Utc::now()).unwrap(),
            "marked_at": mongodb::bson::to_bson(&Utc::now()).unwrap(),
        })
        .await
        .expect("Failed to seed attendance");
}

/// Insert a submitted attempt directly, bypassing the exam flow. Used by
/// grade tests that only care about the stored score.
pub async fn seed_submitted_attempt(
    app: &TestApp,
    exam_id: &str,
    student_id: &str,
    attempt_number: i32,
    score: i32,
) {
    app.mongo
        .collection::<mongodb::bson::Document>("exam_attempts")
        .insert_one(doc! {
            "_id": format!("att-{}", Uuid::new_v4()),
            "exam_id": exam_id,
            "student_id": student_id,
            "session_id": null,
            "attempt_number": attempt_number,
            "status": "submitted",
            "tab_switch_count": 0,
            "score": score,
            "started_at": mongodb::bson::to_bson(&Utc::now()).unwrap(),
            "submitted_at": mongodb::bson::to_bson(&Utc::now()).unwrap(),
        })
        .await
        .expect("Failed to seed attempt");
}
