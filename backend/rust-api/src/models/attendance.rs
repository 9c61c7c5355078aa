use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Class,
    Exam,
    Review,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Class => "class",
            SessionType::Exam => "exam",
            SessionType::Review => "review",
        }
    }
}

/// A scheduled course session. Identity is immutable once attendance
/// records reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSession {
    #[serde(rename = "_id")]
    pub id: String,
    pub course_id: String,
    pub date: DateTime<Utc>,
    pub session_type: SessionType,
    pub lesson_id: Option<String>,
    pub exam_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkedBy {
    Auto,
    Teacher,
}

impl MarkedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkedBy::Auto => "auto",
            MarkedBy::Teacher => "teacher",
        }
    }
}

/// At most one record per (session, student); written only via upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAttendance {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub marked_by: MarkedBy,
    pub joined_at: Option<DateTime<Utc>>,
    pub marked_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchAttendanceRequest {
    #[validate(length(min = 1, message = "records must not be empty"))]
    pub records: Vec<AttendanceMark>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AttendanceMark {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Serialize)]
pub struct BatchAttendanceResponse {
    pub session_id: String,
    pub updated: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionRoster {
    pub session_id: String,
    pub course_id: String,
    pub date: DateTime<Utc>,
    pub session_type: SessionType,
    pub entries: Vec<RosterEntry>,
}

/// One row per enrolled student; students without a record are reported
/// absent with no marker.
#[derive(Debug, Serialize)]
pub struct RosterEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub marked_by: Option<MarkedBy>,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AttendanceSummary {
    pub student_id: String,
    pub course_id: String,
    pub past_class_sessions: u64,
    pub present: u64,
    pub percentage: f64,
}
