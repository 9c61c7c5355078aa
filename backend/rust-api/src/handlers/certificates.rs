use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    handlers::require_staff,
    middlewares::auth::JwtClaims,
    models::certificate::IssueCertificateRequest,
    services::{certificate_service::CertificateService, AppState},
};

/// POST /certificates
pub async fn issue(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<IssueCertificateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_staff(&claims)?;
    req.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let service = CertificateService::new(state.mongo.clone());
    let certificate = service
        .issue(&claims, &req)
        .await
        .map_err(ApiError::from_service)?;

    Ok((StatusCode::CREATED, Json(certificate)))
}

/// POST /certificates/{certificate_id}/revoke
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(certificate_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = CertificateService::new(state.mongo.clone());
    let certificate = service
        .revoke(&claims, &certificate_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(certificate))
}

/// GET /certificates/student/{student_id}
pub async fn list_for_student(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(student_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = CertificateService::new(state.mongo.clone());
    let certificates = service
        .list_for_student(&claims, &student_id)
        .await
        .map_err(ApiError::from_service)?;

    Ok(Json(certificates))
}
