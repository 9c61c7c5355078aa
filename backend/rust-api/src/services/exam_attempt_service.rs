use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions};
use mongodb::{Collection, Database};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics::{ANSWERS_RECORDED_TOTAL, EXAM_ATTEMPTS_TOTAL};
use crate::models::exam::{
    AttemptResult, AttemptStatus, Exam, ExamAnswer, ExamAttempt, ExamForTaking, QuestionResult,
    RecordAnswerRequest, StartAttemptResponse, SubmitResponse, TabSwitchResponse,
};
use crate::models::EventType;
use crate::services::record_activity_event;
use crate::utils::time::bson_datetime;

/// Pass/fail threshold applied when reading back a submitted result.
const PASS_THRESHOLD_PERCENT: f64 = 75.0;

pub struct ExamAttemptService {
    mongo: Database,
}

impl ExamAttemptService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn exams(&self) -> Collection<Exam> {
        self.mongo.collection("exams")
    }

    fn attempts(&self) -> Collection<ExamAttempt> {
        self.mongo.collection("exam_attempts")
    }

    fn answers(&self) -> Collection<ExamAnswer> {
        self.mongo.collection("exam_answers")
    }

    /// Start (or resume) an attempt. At most one non-submitted attempt
    /// exists per (exam, student, session); a second start while one is
    /// open returns it unchanged.
    pub async fn start(
        &self,
        exam_id: &str,
        student_id: &str,
        session_id: Option<&str>,
    ) -> Result<StartAttemptResponse> {
        let exam = self
            .exams()
            .find_one(doc! { "_id": exam_id, "is_published": true })
            .await
            .context("Failed to query exams")?
            .ok_or_else(|| ApiError::not_found("Exam not found"))?;

        let session_value = match session_id {
            Some(s) => Bson::String(s.to_string()),
            None => Bson::Null,
        };

        if let Some(existing) = self
            .attempts()
            .find_one(doc! {
                "exam_id": exam_id,
                "student_id": student_id,
                "session_id": &session_value,
            })
            .await
            .context("Failed to query exam attempts")?
        {
            if existing.status == AttemptStatus::Submitted {
                return Err(ApiError::conflict("Exam already completed").into());
            }

            tracing::info!(
                "Resuming attempt {} for student {} on exam {}",
                existing.id,
                student_id,
                exam_id
            );
            EXAM_ATTEMPTS_TOTAL.with_label_values(&["resumed"]).inc();

            return Ok(StartAttemptResponse {
                attempt_id: existing.id,
                attempt_number: existing.attempt_number,
                started_at: existing.started_at,
                tab_switch_count: existing.tab_switch_count,
                exam: ExamForTaking::from(&exam),
            });
        }

        // Retakes keep counting across session contexts
        let prior_attempts = self
            .attempts()
            .count_documents(doc! { "exam_id": exam_id, "student_id": student_id })
            .await
            .context("Failed to count prior attempts")?;

        let attempt = ExamAttempt {
            id: Uuid::new_v4().to_string(),
            exam_id: exam_id.to_string(),
            student_id: student_id.to_string(),
            session_id: session_id.map(str::to_string),
            attempt_number: prior_attempts as i32 + 1,
            status: AttemptStatus::InProgress,
            tab_switch_count: 0,
            score: None,
            started_at: Utc::now(),
            submitted_at: None,
        };

        self.attempts()
            .insert_one(&attempt)
            .await
            .context("Failed to create exam attempt")?;

        tracing::info!(
            "Started attempt {} (number {}) for student {} on exam {}",
            attempt.id,
            attempt.attempt_number,
            student_id,
            exam_id
        );
        EXAM_ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();

        record_activity_event(&self.mongo, student_id, EventType::ExamStart).await;

        Ok(StartAttemptResponse {
            attempt_id: attempt.id,
            attempt_number: attempt.attempt_number,
            started_at: attempt.started_at,
            tab_switch_count: attempt.tab_switch_count,
            exam: ExamForTaking::from(&exam),
        })
    }

    /// Record (or replace) the answer for one question. Correctness is
    /// evaluated against the current choice data and stored as a snapshot;
    /// it is not re-evaluated at submit time.
    pub async fn record_answer(
        &self,
        attempt_id: &str,
        student_id: &str,
        req: &RecordAnswerRequest,
    ) -> Result<()> {
        let attempt = self.owned_open_attempt(attempt_id, student_id).await?;

        let exam = self
            .exams()
            .find_one(doc! { "_id": &attempt.exam_id })
            .await
            .context("Failed to query exams")?
            .ok_or_else(|| ApiError::not_found("Exam not found"))?;

        let question = exam
            .questions
            .iter()
            .find(|q| q.id == req.question_id)
            .ok_or_else(|| ApiError::not_found("Question not found"))?;

        let choice = question
            .choices
            .iter()
            .find(|c| c.id == req.choice_id)
            .ok_or_else(|| ApiError::not_found("Choice not found"))?;

        let is_correct = choice.is_correct;

        // One answer per (attempt, question); re-answering replaces the
        // previous snapshot.
        self.answers()
            .update_one(
                doc! { "attempt_id": attempt_id, "question_id": &req.question_id },
                doc! {
                    "$set": {
                        "choice_id": &req.choice_id,
                        "is_correct": is_correct,
                        "answered_at": bson_datetime(Utc::now()),
                    },
                    "$setOnInsert": {
                        "_id": Uuid::new_v4().to_string(),
                        "attempt_id": attempt_id,
                        "question_id": &req.question_id,
                    },
                },
            )
            .with_options(UpdateOptions::builder().upsert(true).build())
            .await
            .context("Failed to upsert exam answer")?;

        let correct_label = if is_correct { "true" } else { "false" };
        ANSWERS_RECORDED_TOTAL
            .with_label_values(&[correct_label])
            .inc();

        tracing::debug!(
            "Recorded answer for attempt {} question {} (correct={})",
            attempt_id,
            req.question_id,
            is_correct
        );

        Ok(())
    }

    /// Count a client-reported tab switch. Crossing the exam's threshold
    /// flags the attempt for review; the flag is monotonic and advisory:
    /// it never blocks answering or submission.
    pub async fn record_tab_switch(
        &self,
        attempt_id: &str,
        student_id: &str,
    ) -> Result<TabSwitchResponse> {
        let attempt = self.owned_open_attempt(attempt_id, student_id).await?;

        let exam = self
            .exams()
            .find_one(doc! { "_id": &attempt.exam_id })
            .await
            .context("Failed to query exams")?
            .ok_or_else(|| ApiError::not_found("Exam not found"))?;

        let updated = self
            .attempts()
            .find_one_and_update(
                doc! { "_id": attempt_id },
                doc! { "$inc": { "tab_switch_count": 1 } },
            )
            .with_options(
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .context("Failed to increment tab switch count")?
            .ok_or_else(|| ApiError::not_found("Attempt not found"))?;

        let mut flagged = updated.status == AttemptStatus::Flagged;
        if !flagged && updated.tab_switch_count >= exam.max_tab_switch {
            self.attempts()
                .update_one(
                    doc! {
                        "_id": attempt_id,
                        "status": AttemptStatus::InProgress.as_str(),
                    },
                    doc! { "$set": { "status": AttemptStatus::Flagged.as_str() } },
                )
                .await
                .context("Failed to flag attempt")?;
            flagged = true;

            tracing::warn!(
                "Attempt {} flagged: {} tab switches (threshold {})",
                attempt_id,
                updated.tab_switch_count,
                exam.max_tab_switch
            );
            EXAM_ATTEMPTS_TOTAL.with_label_values(&["flagged"]).inc();
        }

        Ok(TabSwitchResponse {
            tab_switch_count: updated.tab_switch_count,
            max_tab_switch: exam.max_tab_switch,
            flagged,
        })
    }

    /// Submit the attempt and persist the score. Flagged attempts submit
    /// normally; a second submission gets Conflict. The status write is
    /// conditional on the attempt not being submitted yet, so two racing
    /// submits produce exactly one winner.
    pub async fn submit(&self, attempt_id: &str, student_id: &str) -> Result<SubmitResponse> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;
        if attempt.status == AttemptStatus::Submitted {
            return Err(ApiError::conflict("Attempt already submitted").into());
        }

        let exam = self
            .exams()
            .find_one(doc! { "_id": &attempt.exam_id })
            .await
            .context("Failed to query exams")?
            .ok_or_else(|| ApiError::not_found("Exam not found"))?;

        let answers: Vec<ExamAnswer> = self
            .answers()
            .find(doc! { "attempt_id": attempt_id })
            .await
            .context("Failed to query exam answers")?
            .try_collect()
            .await
            .context("Exam answer cursor failure")?;

        let score = score_attempt(&exam, &answers);

        let result = self
            .attempts()
            .update_one(
                doc! {
                    "_id": attempt_id,
                    "status": { "$ne": AttemptStatus::Submitted.as_str() },
                },
                doc! {
                    "$set": {
                        "status": AttemptStatus::Submitted.as_str(),
                        "score": score,
                        "submitted_at": bson_datetime(Utc::now()),
                    },
                },
            )
            .await
            .context("Failed to submit attempt")?;

        if result.modified_count == 0 {
            // Lost the race against a concurrent submit
            return Err(ApiError::conflict("Attempt already submitted").into());
        }

        tracing::info!(
            "Attempt {} submitted: score {}/{}",
            attempt_id,
            score,
            exam.total_points
        );
        EXAM_ATTEMPTS_TOTAL.with_label_values(&["submitted"]).inc();

        record_activity_event(&self.mongo, student_id, EventType::ExamSubmit).await;

        Ok(SubmitResponse {
            score,
            total_points: exam.total_points,
            percentage: percentage_of(score, exam.total_points),
        })
    }

    /// Per-question breakdown for any of the student's own attempts. Score
    /// and pass/fail stay null until the attempt is submitted, and correct
    /// choices are only revealed then.
    pub async fn get_result(&self, attempt_id: &str, student_id: &str) -> Result<AttemptResult> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;

        let exam = self
            .exams()
            .find_one(doc! { "_id": &attempt.exam_id })
            .await
            .context("Failed to query exams")?
            .ok_or_else(|| ApiError::not_found("Exam not found"))?;

        let answers: Vec<ExamAnswer> = self
            .answers()
            .find(doc! { "attempt_id": attempt_id })
            .await
            .context("Failed to query exam answers")?
            .try_collect()
            .await
            .context("Exam answer cursor failure")?;

        let answers_by_question: HashMap<&str, &ExamAnswer> = answers
            .iter()
            .map(|a| (a.question_id.as_str(), a))
            .collect();

        let submitted = attempt.status == AttemptStatus::Submitted;

        let mut ordered: Vec<_> = exam.questions.iter().collect();
        ordered.sort_by_key(|q| q.order);

        let questions: Vec<QuestionResult> = ordered
            .into_iter()
            .map(|q| {
                let answer = answers_by_question.get(q.id.as_str());
                let correct_choice_id = if submitted {
                    q.choices.iter().find(|c| c.is_correct).map(|c| c.id.clone())
                } else {
                    None
                };
                QuestionResult {
                    question_id: q.id.clone(),
                    text: q.text.clone(),
                    points: q.points,
                    selected_choice_id: answer.map(|a| a.choice_id.clone()),
                    correct_choice_id,
                    is_correct: answer.map(|a| a.is_correct),
                    earned_points: answer
                        .filter(|a| a.is_correct)
                        .map(|_| q.points)
                        .unwrap_or(0),
                }
            })
            .collect();

        let percentage = attempt
            .score
            .map(|s| percentage_of(s, exam.total_points));

        Ok(AttemptResult {
            attempt_id: attempt.id,
            exam_id: exam.id,
            status: attempt.status,
            score: attempt.score,
            total_points: exam.total_points,
            percentage,
            passed: percentage.map(|p| p >= PASS_THRESHOLD_PERCENT),
            questions,
        })
    }

    /// Load an attempt owned by the student. Unowned attempts read as
    /// missing so attempt ids do not leak across students.
    async fn owned_attempt(&self, attempt_id: &str, student_id: &str) -> Result<ExamAttempt> {
        let attempt = self
            .attempts()
            .find_one(doc! { "_id": attempt_id })
            .await
            .context("Failed to query exam attempts")?
            .ok_or_else(|| ApiError::not_found("Attempt not found"))?;

        if attempt.student_id != student_id {
            return Err(ApiError::not_found("Attempt not found").into());
        }

        Ok(attempt)
    }

    /// Same as `owned_attempt` but rejects submitted attempts. Flagged
    /// attempts stay open.
    async fn owned_open_attempt(&self, attempt_id: &str, student_id: &str) -> Result<ExamAttempt> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;
        if attempt.status == AttemptStatus::Submitted {
            return Err(ApiError::conflict("Attempt already submitted").into());
        }
        Ok(attempt)
    }
}

/// Sum of points for every question whose recorded answer snapshot is
/// correct. Unanswered questions contribute 0.
fn score_attempt(exam: &Exam, answers: &[ExamAnswer]) -> i32 {
    let points_by_question: HashMap<&str, i32> = exam
        .questions
        .iter()
        .map(|q| (q.id.as_str(), q.points))
        .collect();

    answers
        .iter()
        .filter(|a| a.is_correct)
        .filter_map(|a| points_by_question.get(a.question_id.as_str()))
        .sum()
}

fn percentage_of(score: i32, total_points: i32) -> f64 {
    if total_points > 0 {
        f64::from(score) / f64::from(total_points) * 100.0
    } else {
        0.0
    }
}
