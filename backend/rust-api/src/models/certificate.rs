use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Active,
    Revoked,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Active => "active",
            CertificateStatus::Revoked => "revoked",
        }
    }
}

/// Manually issued record; independent of grade calculations. Revocation
/// keeps the record with a `revoked` status rather than deleting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub course_id: Option<String>,
    pub program_id: Option<String>,
    pub title: String,
    pub serial: String,
    pub status: CertificateStatus,
    pub issued_by: String,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssueCertificateRequest {
    pub student_id: String,
    pub course_id: Option<String>,
    pub program_id: Option<String>,
    #[validate(length(min = 1, max = 200, message = "title must be 1..=200 characters"))]
    pub title: String,
}
