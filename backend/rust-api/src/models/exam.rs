use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An exam belongs to either a course or a program. Questions and choices
/// are embedded and carry their own ids so answers can reference them after
/// the exam content changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    #[serde(rename = "_id")]
    pub id: String,
    pub course_id: Option<String>,
    pub program_id: Option<String>,
    pub title: String,
    pub total_points: i32,
    pub time_limit_minutes: i32,
    pub max_tab_switch: i32,
    pub is_published: bool,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub points: i32,
    pub order: i32,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Flagged,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::Flagged => "flagged",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub session_id: Option<String>,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub tab_switch_count: i32,
    pub score: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Answer snapshot. `is_correct` is evaluated when the answer is recorded,
/// not at grading time; later edits to the exam content do not re-evaluate
/// already-recorded answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamAnswer {
    #[serde(rename = "_id")]
    pub id: String,
    pub attempt_id: String,
    pub question_id: String,
    pub choice_id: String,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

/// Exam content as shown to a student taking it. Never carries the
/// correct-choice flags.
#[derive(Debug, Clone, Serialize)]
pub struct ExamForTaking {
    pub id: String,
    pub title: String,
    pub total_points: i32,
    pub time_limit_minutes: i32,
    pub max_tab_switch: i32,
    pub questions: Vec<QuestionForTaking>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionForTaking {
    pub id: String,
    pub text: String,
    pub points: i32,
    pub order: i32,
    pub choices: Vec<ChoiceForTaking>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoiceForTaking {
    pub id: String,
    pub text: String,
}

impl From<&Exam> for ExamForTaking {
    fn from(exam: &Exam) -> Self {
        let mut questions: Vec<QuestionForTaking> = exam
            .questions
            .iter()
            .map(|q| QuestionForTaking {
                id: q.id.clone(),
                text: q.text.clone(),
                points: q.points,
                order: q.order,
                choices: q
                    .choices
                    .iter()
                    .map(|c| ChoiceForTaking {
                        id: c.id.clone(),
                        text: c.text.clone(),
                    })
                    .collect(),
            })
            .collect();
        questions.sort_by_key(|q| q.order);

        ExamForTaking {
            id: exam.id.clone(),
            title: exam.title.clone(),
            total_points: exam.total_points,
            time_limit_minutes: exam.time_limit_minutes,
            max_tab_switch: exam.max_tab_switch,
            questions,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartAttemptRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub attempt_id: String,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub tab_switch_count: i32,
    pub exam: ExamForTaking,
}

#[derive(Debug, Deserialize)]
pub struct RecordAnswerRequest {
    pub question_id: String,
    pub choice_id: String,
}

#[derive(Debug, Serialize)]
pub struct RecordAnswerResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct TabSwitchResponse {
    pub tab_switch_count: i32,
    pub max_tab_switch: i32,
    pub flagged: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub score: i32,
    pub total_points: i32,
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct AttemptResult {
    pub attempt_id: String,
    pub exam_id: String,
    pub status: AttemptStatus,
    pub score: Option<i32>,
    pub total_points: i32,
    pub percentage: Option<f64>,
    pub passed: Option<bool>,
    pub questions: Vec<QuestionResult>,
}

#[derive(Debug, Serialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub text: String,
    pub points: i32,
    pub selected_choice_id: Option<String>,
    /// Only revealed once the attempt is submitted.
    pub correct_choice_id: Option<String>,
    pub is_correct: Option<bool>,
    pub earned_points: i32,
}
