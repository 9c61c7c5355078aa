use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ActivityEvent;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsRangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SystemOverview {
    pub users_by_role: HashMap<String, u64>,
    pub total_enrollments: u64,
    pub active_enrollments: u64,
    pub certificates_issued: u64,
    pub events_by_type: HashMap<String, u64>,
    pub daily_active_users: u64,
    /// Seven entries, oldest day first. All zero when nothing was created
    /// in the window.
    pub enrollment_trend: Vec<TrendPoint>,
}

#[derive(Debug, Serialize)]
pub struct TrendPoint {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct CourseAnalytics {
    pub course_id: String,
    pub enrollment_count: u64,
    pub active_enrollments: u64,
    pub attendance_rate: f64,
    pub average_exam_score: f64,
    pub grade_distribution: HashMap<String, u64>,
    /// Fraction of calculated grades that are not an F.
    pub completion_rate: f64,
    pub at_risk: Vec<AtRiskStudent>,
}

#[derive(Debug, Serialize)]
pub struct AtRiskStudent {
    pub student_id: String,
    pub attendance_percentage: f64,
    pub exam_average: f64,
}

#[derive(Debug, Serialize)]
pub struct StudentAnalytics {
    pub student_id: String,
    pub gpa: f64,
    pub courses: Vec<CourseProgress>,
    pub recent_activity: Vec<ActivityEvent>,
}

#[derive(Debug, Serialize)]
pub struct CourseProgress {
    pub course_id: String,
    pub letter_grade: Option<String>,
    pub final_grade: Option<f64>,
    pub attendance_percentage: f64,
    pub exam_average: f64,
}

#[derive(Debug, Serialize)]
pub struct TeacherAnalytics {
    pub teacher_id: String,
    pub course_count: u64,
    pub program_count: u64,
    pub total_enrollments: u64,
    pub total_sessions: u64,
    pub certificates_issued: u64,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: String,
    #[serde(rename = "type")]
    pub export_type: String,
}
