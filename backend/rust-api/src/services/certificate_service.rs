use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middlewares::auth::JwtClaims;
use crate::models::certificate::{Certificate, CertificateStatus, IssueCertificateRequest};
use crate::models::{Course, Program};
use crate::utils::time::bson_datetime;

pub struct CertificateService {
    mongo: Database,
}

impl CertificateService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn certificates(&self) -> Collection<Certificate> {
        self.mongo.collection("certificates")
    }

    /// Issue a certificate for a course or a program (exactly one).
    /// Issuance is a manual staff action, never derived from grades.
    pub async fn issue(
        &self,
        claims: &JwtClaims,
        req: &IssueCertificateRequest,
    ) -> Result<Certificate> {
        match (&req.course_id, &req.program_id) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(ApiError::validation(
                    "Exactly one of course_id or program_id is required",
                )
                .into());
            }
            _ => {}
        }

        if let Some(course_id) = &req.course_id {
            let course = self
                .mongo
                .collection::<Course>("courses")
                .find_one(doc! { "_id": course_id })
                .await
                .context("Failed to query courses")?
                .ok_or_else(|| ApiError::not_found("Course not found"))?;
            if !claims.is_admin() && course.teacher_id != claims.sub {
                return Err(ApiError::forbidden("Not the course teacher").into());
            }
        }
        if let Some(program_id) = &req.program_id {
            let program = self
                .mongo
                .collection::<Program>("programs")
                .find_one(doc! { "_id": program_id })
                .await
                .context("Failed to query programs")?
                .ok_or_else(|| ApiError::not_found("Program not found"))?;
            if !claims.is_admin() && program.teacher_id != claims.sub {
                return Err(ApiError::forbidden("Not the program teacher").into());
            }
        }

        let id = Uuid::new_v4().to_string();
        let certificate = Certificate {
            serial: make_serial(Utc::now().year(), &id),
            id,
            student_id: req.student_id.clone(),
            course_id: req.course_id.clone(),
            program_id: req.program_id.clone(),
            title: req.title.clone(),
            status: CertificateStatus::Active,
            issued_by: claims.sub.clone(),
            issued_at: Utc::now(),
            revoked_at: None,
        };

        self.certificates()
            .insert_one(&certificate)
            .await
            .context("Failed to insert certificate")?;

        tracing::info!(
            "Certificate {} issued to student {} by {}",
            certificate.serial,
            certificate.student_id,
            claims.sub
        );

        Ok(certificate)
    }

    /// Revoking keeps the record; a second revoke is a Conflict.
    pub async fn revoke(&self, claims: &JwtClaims, certificate_id: &str) -> Result<Certificate> {
        if !claims.is_staff() {
            return Err(ApiError::forbidden("Staff role required").into());
        }

        let certificate = self
            .certificates()
            .find_one(doc! { "_id": certificate_id })
            .await
            .context("Failed to query certificates")?
            .ok_or_else(|| ApiError::not_found("Certificate not found"))?;

        if certificate.status == CertificateStatus::Revoked {
            return Err(ApiError::conflict("Certificate already revoked").into());
        }

        let now = Utc::now();
        self.certificates()
            .update_one(
                doc! { "_id": certificate_id },
                doc! {
                    "$set": {
                        "status": CertificateStatus::Revoked.as_str(),
                        "revoked_at": bson_datetime(now),
                    },
                },
            )
            .await
            .context("Failed to revoke certificate")?;

        tracing::info!("Certificate {} revoked by {}", certificate.serial, claims.sub);

        Ok(Certificate {
            status: CertificateStatus::Revoked,
            revoked_at: Some(now),
            ..certificate
        })
    }

    pub async fn list_for_student(
        &self,
        claims: &JwtClaims,
        student_id: &str,
    ) -> Result<Vec<Certificate>> {
        if !claims.is_staff() && claims.sub != student_id {
            return Err(ApiError::forbidden("Cannot view another student's certificates").into());
        }

        self.certificates()
            .find(doc! { "student_id": student_id })
            .sort(doc! { "issued_at": -1 })
            .await
            .context("Failed to query certificates")?
            .try_collect()
            .await
            .context("Certificate cursor failure")
    }
}

fn make_serial(year: i32, id: &str) -> String {
    let short: String = id.chars().filter(|c| *c != '-').take(8).collect();
    format!("CERT-{}-{}", year, short.to_uppercase())
}
