use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::ApiError,
    extractors::AppJson,
    handlers::require_student,
    middlewares::auth::JwtClaims,
    models::exam::{RecordAnswerRequest, RecordAnswerResponse, StartAttemptRequest},
    services::{exam_attempt_service::ExamAttemptService, grade_service::GradeService, AppState},
};

/// POST /student-programs/exams/{exam_id}/start
pub async fn start_exam(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(exam_id): Path<String>,
    payload: Option<AppJson<StartAttemptRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    require_student(&claims)?;

    let session_id = payload.and_then(|AppJson(p)| p.session_id);
    tracing::info!(
        "Starting exam {} for student {} (session: {:?})",
        exam_id,
        claims.sub,
        session_id
    );

    let service = ExamAttemptService::new(state.mongo.clone());
    let response = service
        .start(&exam_id, &claims.sub, session_id.as_deref())
        .await
        .map_err(ApiError::from_service)?;

    Ok((StatusCode::OK, Json(response)))
}

/// POST /student-programs/exams/attempt/{attempt_id}/answer
pub async fn record_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<RecordAnswerRequest>,
) -> Result<Json<RecordAnswerResponse>, ApiError> {
    require_student(&claims)?;

    let service = ExamAttemptService::new(state.mongo.clone());
    service
        .record_answer(&attempt_id, &claims.sub, &req)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(RecordAnswerResponse { success: true }))
}

/// POST /student-programs/exams/attempt/{attempt_id}/tab-switch
pub async fn record_tab_switch(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_student(&claims)?;

    let service = ExamAttemptService::new(state.mongo.clone());
    let response = service
        .record_tab_switch(&attempt_id, &claims.sub)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(response))
}

/// POST /student-programs/exams/attempt/{attempt_id}/submit
pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_student(&claims)?;

    tracing::info!("Submitting attempt {} for student {}", attempt_id, claims.sub);

    let service = ExamAttemptService::new(state.mongo.clone());
    let response = service
        .submit(&attempt_id, &claims.sub)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(response))
}

/// GET /student-programs/exams/attempt/{attempt_id}/result
pub async fn attempt_result(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_student(&claims)?;

    let service = ExamAttemptService::new(state.mongo.clone());
    let result = service
        .get_result(&attempt_id, &claims.sub)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(result))
}

/// GET /student-programs/{program_id}/grade
pub async fn program_grade(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(program_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_student(&claims)?;

    let service = GradeService::new(state.mongo.clone(), state.grading.clone());
    let view = service
        .program_grade_view(&claims.sub, &program_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(view))
}
