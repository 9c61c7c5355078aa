#![allow(dead_code)]

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             script-src 'self' 'unsafe-inline'; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; \
             connect-src 'self'",
        ),
    );
    response
}

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    // CORS configuration for the analytics dashboard endpoints
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Student exam flow (require JWT; rate limited)
        .nest(
            "/api/v1/student-programs",
            student_programs_routes()
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::rate_limit_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        .nest(
            "/api/v1/attendance",
            attendance_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/v1/grades",
            grades_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/v1/analytics",
            analytics_routes()
                .layer(cors) // Apply CORS to analytics endpoints
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        .nest(
            "/api/v1/certificates",
            certificates_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware)) // Apply CSP to all responses
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn student_programs_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/exams/{exam_id}/start", post(handlers::exams::start_exam))
        .route(
            "/exams/attempt/{attempt_id}/answer",
            post(handlers::exams::record_answer),
        )
        .route(
            "/exams/attempt/{attempt_id}/tab-switch",
            post(handlers::exams::record_tab_switch),
        )
        .route(
            "/exams/attempt/{attempt_id}/submit",
            post(handlers::exams::submit_attempt),
        )
        .route(
            "/exams/attempt/{attempt_id}/result",
            get(handlers::exams::attempt_result),
        )
        .route("/{program_id}/grade", get(handlers::exams::program_grade))
}

fn attendance_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/sessions/{session_id}/join",
            post(handlers::attendance::join_session),
        )
        .route(
            "/sessions/{session_id}/batch",
            post(handlers::attendance::mark_batch),
        )
        .route(
            "/sessions/{session_id}",
            get(handlers::attendance::session_roster),
        )
        .route(
            "/students/{student_id}/courses/{course_id}",
            get(handlers::attendance::student_summary),
        )
}

fn grades_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route(
            "/student/{student_id}",
            get(handlers::grades::student_grades),
        )
        .route(
            "/calculate/course/{course_id}",
            post(handlers::grades::calculate_course),
        )
        .route(
            "/calculate/program/{program_id}",
            post(handlers::grades::calculate_program),
        )
        .route(
            "/calculate/all/{student_id}",
            post(handlers::grades::calculate_all),
        )
}

fn analytics_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/overview", get(handlers::analytics::overview))
        .route("/course/{course_id}", get(handlers::analytics::course))
        .route("/student/{student_id}", get(handlers::analytics::student))
        .route("/teacher/{teacher_id}", get(handlers::analytics::teacher))
        .route("/export", get(handlers::analytics::export))
}

fn certificates_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/", post(handlers::certificates::issue))
        .route(
            "/{certificate_id}/revoke",
            post(handlers::certificates::revoke),
        )
        .route(
            "/student/{student_id}",
            get(handlers::certificates::list_for_student),
        )
}
