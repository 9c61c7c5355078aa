use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Teacher => "teacher",
            UserRole::Admin => "admin",
        }
    }
}

/// A course offering. Course CRUD lives in the admin system; this service
/// only reads courses for ownership checks and rollups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub teacher_id: String,
    pub program_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub teacher_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramEnrollment {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub program_id: String,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Dropped => "dropped",
        }
    }
}

/// Append-only user activity record. Login/logout events are written by the
/// auth system; exam and attendance handlers append their own best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Login,
    Logout,
    ExamStart,
    ExamSubmit,
    SessionJoin,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Login => "login",
            EventType::Logout => "logout",
            EventType::ExamStart => "exam_start",
            EventType::ExamSubmit => "exam_submit",
            EventType::SessionJoin => "session_join",
        }
    }
}

pub mod analytics;
pub mod attendance;
pub mod certificate;
pub mod exam;
pub mod grade;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_enums_use_snake_case() {
        assert_eq!(
            serde_json::to_string(&EnrollmentStatus::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&UserRole::Teacher).unwrap(),
            "\"teacher\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::ExamSubmit).unwrap(),
            "\"exam_submit\""
        );
    }

    #[test]
    fn event_type_as_str_matches_serde() {
        for event in [
            EventType::Login,
            EventType::Logout,
            EventType::ExamStart,
            EventType::ExamSubmit,
            EventType::SessionJoin,
        ] {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.as_str()));
        }
    }
}
