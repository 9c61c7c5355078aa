use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    handlers::{require_self_or_staff, require_student},
    middlewares::auth::JwtClaims,
    models::attendance::BatchAttendanceRequest,
    services::{attendance_service::AttendanceService, AppState},
};

/// POST /attendance/sessions/{session_id}/join: student self-check-in.
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_student(&claims)?;

    let service = AttendanceService::new(state.mongo.clone());
    service
        .join_session(&session_id, &claims.sub)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /attendance/sessions/{session_id}/batch: teacher bulk marking,
/// applied all-or-nothing.
pub async fn mark_batch(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<BatchAttendanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    tracing::info!(
        "Batch attendance for session {} by {} ({} records)",
        session_id,
        claims.sub,
        req.records.len()
    );

    let service = AttendanceService::new(state.mongo.clone());
    let response = service
        .mark_batch(&session_id, &claims, &req.records)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(response))
}

/// GET /attendance/sessions/{session_id}: roster for staff.
pub async fn session_roster(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = AttendanceService::new(state.mongo.clone());
    let roster = service
        .session_roster(&session_id, &claims)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(roster))
}

/// GET /attendance/students/{student_id}/courses/{course_id}
pub async fn student_summary(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((student_id, course_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_staff(&claims, &student_id)?;

    let service = AttendanceService::new(state.mongo.clone());
    let summary = service
        .student_summary(&student_id, &course_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(summary))
}
