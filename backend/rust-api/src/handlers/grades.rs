use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::ApiError,
    extractors::AppJson,
    handlers::require_self_or_staff,
    middlewares::auth::JwtClaims,
    models::grade::CalculateGradeRequest,
    services::{grade_service::GradeService, AppState},
};

/// Students recalculate their own grades; staff may name another student
/// in the request body.
fn resolve_target(claims: &JwtClaims, requested: Option<String>) -> Result<String, ApiError> {
    match requested {
        Some(student_id) if student_id != claims.sub => {
            if claims.is_staff() {
                Ok(student_id)
            } else {
                Err(ApiError::forbidden(
                    "Cannot recalculate another student's grades",
                ))
            }
        }
        _ => Ok(claims.sub.clone()),
    }
}

/// GET /grades/student/{student_id}
pub async fn student_grades(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_staff(&claims, &student_id)?;

    let service = GradeService::new(state.mongo.clone(), state.grading.clone());
    let grades = service
        .student_grades(&student_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(grades))
}

/// POST /grades/calculate/course/{course_id}
pub async fn calculate_course(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(course_id): Path<String>,
    payload: Option<AppJson<CalculateGradeRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let requested = payload.and_then(|AppJson(p)| p.student_id);
    let student_id = resolve_target(&claims, requested)?;

    let service = GradeService::new(state.mongo.clone(), state.grading.clone());
    let grade = service
        .calculate_course_grade(&student_id, &course_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(grade))
}

/// POST /grades/calculate/program/{program_id}
pub async fn calculate_program(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(program_id): Path<String>,
    payload: Option<AppJson<CalculateGradeRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let requested = payload.and_then(|AppJson(p)| p.student_id);
    let student_id = resolve_target(&claims, requested)?;

    let service = GradeService::new(state.mongo.clone(), state.grading.clone());
    let grade = service
        .calculate_program_grade(&student_id, &program_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(grade))
}

/// POST /grades/calculate/all/{student_id}
pub async fn calculate_all(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_staff(&claims, &student_id)?;

    tracing::info!("Recalculating all grades for student {}", student_id);

    let service = GradeService::new(state.mongo.clone(), state.grading.clone());
    let grades = service
        .calculate_all_student_grades(&student_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(grades))
}
