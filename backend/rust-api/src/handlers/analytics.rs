use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::ApiError,
    handlers::{require_admin, require_self_or_staff},
    middlewares::auth::JwtClaims,
    models::analytics::{AnalyticsRangeQuery, ExportQuery},
    services::{analytics_service::AnalyticsService, AppState},
};

/// GET /analytics/overview
pub async fn overview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(range): Query<AnalyticsRangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let service = AnalyticsService::new(state.mongo.clone());
    let overview = service
        .system_overview(range.from, range.to)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(overview))
}

/// GET /analytics/course/{course_id}
pub async fn course(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(course_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = AnalyticsService::new(state.mongo.clone());
    let analytics = service
        .course_analytics(&course_id, &claims)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(analytics))
}

/// GET /analytics/student/{student_id}
pub async fn student(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_self_or_staff(&claims, &student_id)?;

    let service = AnalyticsService::new(state.mongo.clone());
    let analytics = service
        .student_analytics(&student_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(analytics))
}

/// GET /analytics/teacher/{teacher_id}
pub async fn teacher(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(teacher_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.sub != teacher_id && !claims.is_admin() {
        return Err(ApiError::forbidden("Cannot view another teacher's analytics"));
    }

    let service = AnalyticsService::new(state.mongo.clone());
    let analytics = service
        .teacher_analytics(&teacher_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(analytics))
}

/// GET /analytics/export?format=csv&type=grades|attendance|enrollments
pub async fn export(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    if query.format != "csv" {
        return Err(ApiError::validation(format!(
            "Unsupported export format: {}",
            query.format
        )));
    }

    tracing::info!("Exporting {} as CSV for {}", query.export_type, claims.sub);

    let service = AnalyticsService::new(state.mongo.clone());
    let csv = service
        .export_csv(&query.export_type)
        .await
        .map_err(ApiError::from_service)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", query.export_type),
            ),
        ],
        csv,
    ))
}
