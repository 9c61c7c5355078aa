use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived record, recomputed on demand; never a source of truth. Keyed by
/// `{student_id}:{course_id}` or `{student_id}:{program_id}` so recomputes
/// replace the prior values in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeCalculation {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_id: String,
    pub course_id: Option<String>,
    pub program_id: Option<String>,
    pub exam_score: f64,
    pub attendance_score: f64,
    pub final_grade: f64,
    pub letter_grade: String,
    pub gpa: f64,
    pub calculated_at: DateTime<Utc>,
}

impl GradeCalculation {
    pub fn course_key(student_id: &str, course_id: &str) -> String {
        format!("{}:{}", student_id, course_id)
    }

    pub fn program_key(student_id: &str, program_id: &str) -> String {
        format!("{}:{}", student_id, program_id)
    }
}

/// One band of the letter-grade scale: `final_grade >= min` maps to
/// `letter` / `gpa`. Bands are ordered highest first.
#[derive(Debug, Clone, Copy)]
pub struct GradeBand {
    pub min: f64,
    pub letter: &'static str,
    pub gpa: f64,
}

/// Immutable grading parameters passed into the calculator. Tests swap in
/// alternate scales; production uses the default.
#[derive(Debug, Clone)]
pub struct GradingConfig {
    pub exam_weight: f64,
    pub attendance_weight: f64,
    pub scale: Vec<GradeBand>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            exam_weight: 0.7,
            attendance_weight: 0.3,
            scale: vec![
                GradeBand { min: 93.0, letter: "A", gpa: 4.0 },
                GradeBand { min: 90.0, letter: "A-", gpa: 3.7 },
                GradeBand { min: 87.0, letter: "B+", gpa: 3.3 },
                GradeBand { min: 83.0, letter: "B", gpa: 3.0 },
                GradeBand { min: 80.0, letter: "B-", gpa: 2.7 },
                GradeBand { min: 77.0, letter: "C+", gpa: 2.3 },
                GradeBand { min: 73.0, letter: "C", gpa: 2.0 },
                GradeBand { min: 70.0, letter: "C-", gpa: 1.7 },
                GradeBand { min: 60.0, letter: "D", gpa: 1.0 },
            ],
        }
    }
}

impl GradingConfig {
    /// Weighted final grade from an exam average and an attendance
    /// percentage, both on the 0..=100 scale.
    pub fn weighted_final(&self, exam_average: f64, attendance_percentage: f64) -> f64 {
        exam_average * self.exam_weight + attendance_percentage * self.attendance_weight
    }

    /// Map a final grade to its letter and GPA. Grades below every band
    /// fall through to F / 0.0.
    pub fn letter_for(&self, final_grade: f64) -> (&'static str, f64) {
        for band in &self.scale {
            if final_grade >= band.min {
                return (band.letter, band.gpa);
            }
        }
        ("F", 0.0)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CalculateGradeRequest {
    /// Staff may recalculate on behalf of a student; students may only
    /// recalculate their own grades.
    #[serde(default)]
    pub student_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProgramGradeView {
    pub program_id: String,
    pub exams: Vec<ProgramExamScore>,
    pub exam_average: f64,
    pub letter_grade: String,
}

#[derive(Debug, Serialize)]
pub struct ProgramExamScore {
    pub exam_id: String,
    pub title: String,
    pub score: Option<i32>,
    pub total_points: i32,
    pub percentage: Option<f64>,
}
