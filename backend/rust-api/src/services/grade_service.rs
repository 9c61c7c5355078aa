use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::ReplaceOptions;
use mongodb::{Collection, Database};

use crate::error::ApiError;
use crate::metrics::GRADES_CALCULATED_TOTAL;
use crate::models::exam::{AttemptStatus, Exam, ExamAttempt};
use crate::models::grade::{
    GradeCalculation, GradingConfig, ProgramExamScore, ProgramGradeView,
};
use crate::models::{Course, Enrollment, ProgramEnrollment};
use crate::services::attendance_service::AttendanceService;

pub struct GradeService {
    mongo: Database,
    config: GradingConfig,
}

impl GradeService {
    pub fn new(mongo: Database, config: GradingConfig) -> Self {
        Self { mongo, config }
    }

    fn exams(&self) -> Collection<Exam> {
        self.mongo.collection("exams")
    }

    fn attempts(&self) -> Collection<ExamAttempt> {
        self.mongo.collection("exam_attempts")
    }

    fn grades(&self) -> Collection<GradeCalculation> {
        self.mongo.collection("grade_calculations")
    }

    fn enrollments(&self) -> Collection<Enrollment> {
        self.mongo.collection("enrollments")
    }

    fn program_enrollments(&self) -> Collection<ProgramEnrollment> {
        self.mongo.collection("program_enrollments")
    }

    fn courses(&self) -> Collection<Course> {
        self.mongo.collection("courses")
    }

    /// Recompute and persist the course grade. Pure recomputation: running
    /// it twice over unchanged data writes identical values.
    pub async fn calculate_course_grade(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<GradeCalculation> {
        let enrollment = self
            .enrollments()
            .find_one(doc! { "student_id": student_id, "course_id": course_id })
            .await
            .context("Failed to query enrollments")?;
        if enrollment.is_none() {
            return Err(ApiError::not_found("Enrollment not found").into());
        }

        let exam_score = self
            .exam_average(student_id, doc! { "course_id": course_id, "is_published": true })
            .await?;

        let attendance = AttendanceService::new(self.mongo.clone());
        let (past, present) = attendance.course_counts(student_id, course_id).await?;
        let attendance_score =
            crate::services::attendance_service::attendance_percentage(past, present);

        let grade = self
            .persist(
                GradeCalculation::course_key(student_id, course_id),
                student_id,
                Some(course_id),
                None,
                exam_score,
                attendance_score,
            )
            .await?;

        GRADES_CALCULATED_TOTAL.with_label_values(&["course"]).inc();
        Ok(grade)
    }

    /// Program variant: exam average over the program's exams, attendance
    /// averaged across the program's courses (a program has no sessions of
    /// its own).
    pub async fn calculate_program_grade(
        &self,
        student_id: &str,
        program_id: &str,
    ) -> Result<GradeCalculation> {
        let enrollment = self
            .program_enrollments()
            .find_one(doc! { "student_id": student_id, "program_id": program_id })
            .await
            .context("Failed to query program enrollments")?;
        if enrollment.is_none() {
            return Err(ApiError::not_found("Program enrollment not found").into());
        }

        let exam_score = self
            .exam_average(student_id, doc! { "program_id": program_id, "is_published": true })
            .await?;

        let courses: Vec<Course> = self
            .courses()
            .find(doc! { "program_id": program_id })
            .await
            .context("Failed to query program courses")?
            .try_collect()
            .await
            .context("Course cursor failure")?;

        let attendance = AttendanceService::new(self.mongo.clone());
        let mut percentages = Vec::new();
        for course in &courses {
            let (past, present) = attendance.course_counts(student_id, &course.id).await?;
            if past > 0 {
                percentages.push(
                    crate::services::attendance_service::attendance_percentage(past, present),
                );
            }
        }
        let attendance_score = mean(&percentages);

        let grade = self
            .persist(
                GradeCalculation::program_key(student_id, program_id),
                student_id,
                None,
                Some(program_id),
                exam_score,
                attendance_score,
            )
            .await?;

        GRADES_CALCULATED_TOTAL
            .with_label_values(&["program"])
            .inc();
        Ok(grade)
    }

    /// Fan out over every enrollment and program enrollment the student
    /// has, recomputing each grade independently. Safe to re-run.
    pub async fn calculate_all_student_grades(
        &self,
        student_id: &str,
    ) -> Result<Vec<GradeCalculation>> {
        let enrollments: Vec<Enrollment> = self
            .enrollments()
            .find(doc! { "student_id": student_id })
            .await
            .context("Failed to query enrollments")?
            .try_collect()
            .await
            .context("Enrollment cursor failure")?;

        let program_enrollments: Vec<ProgramEnrollment> = self
            .program_enrollments()
            .find(doc! { "student_id": student_id })
            .await
            .context("Failed to query program enrollments")?
            .try_collect()
            .await
            .context("Program enrollment cursor failure")?;

        let mut grades = Vec::with_capacity(enrollments.len() + program_enrollments.len());
        for enrollment in &enrollments {
            grades.push(
                self.calculate_course_grade(student_id, &enrollment.course_id)
                    .await?,
            );
        }
        for enrollment in &program_enrollments {
            grades.push(
                self.calculate_program_grade(student_id, &enrollment.program_id)
                    .await?,
            );
        }

        tracing::info!(
            "Recalculated {} grades for student {}",
            grades.len(),
            student_id
        );

        Ok(grades)
    }

    pub async fn student_grades(&self, student_id: &str) -> Result<Vec<GradeCalculation>> {
        self.grades()
            .find(doc! { "student_id": student_id })
            .await
            .context("Failed to query grade calculations")?
            .try_collect()
            .await
            .context("Grade cursor failure")
    }

    /// Per-exam score list for the student across a program's published
    /// exams, with the overall exam average and its letter.
    pub async fn program_grade_view(
        &self,
        student_id: &str,
        program_id: &str,
    ) -> Result<ProgramGradeView> {
        let exams: Vec<Exam> = self
            .exams()
            .find(doc! { "program_id": program_id, "is_published": true })
            .await
            .context("Failed to query exams")?
            .try_collect()
            .await
            .context("Exam cursor failure")?;

        let latest = self
            .latest_submitted_attempts(student_id, exams.iter().map(|e| e.id.as_str()))
            .await?;

        let mut scores = Vec::with_capacity(exams.len());
        let mut percentages = Vec::new();
        for exam in &exams {
            let attempt = latest.get(exam.id.as_str());
            let score = attempt.and_then(|a| a.score);
            let percentage = score.map(|s| {
                if exam.total_points > 0 {
                    f64::from(s) / f64::from(exam.total_points) * 100.0
                } else {
                    0.0
                }
            });
            if let Some(p) = percentage {
                percentages.push(p);
            }
            scores.push(ProgramExamScore {
                exam_id: exam.id.clone(),
                title: exam.title.clone(),
                score,
                total_points: exam.total_points,
                percentage,
            });
        }

        let exam_average = mean(&percentages);
        let (letter, _) = self.config.letter_for(exam_average);

        Ok(ProgramGradeView {
            program_id: program_id.to_string(),
            exams: scores,
            exam_average,
            letter_grade: letter.to_string(),
        })
    }

    /// Mean percentage over the latest submitted attempt of each matching
    /// exam. Exams the student never submitted are excluded; no exams at
    /// all means 0.
    async fn exam_average(
        &self,
        student_id: &str,
        exam_filter: mongodb::bson::Document,
    ) -> Result<f64> {
        let exams: Vec<Exam> = self
            .exams()
            .find(exam_filter)
            .await
            .context("Failed to query exams")?
            .try_collect()
            .await
            .context("Exam cursor failure")?;

        if exams.is_empty() {
            return Ok(0.0);
        }

        let latest = self
            .latest_submitted_attempts(student_id, exams.iter().map(|e| e.id.as_str()))
            .await?;

        let mut percentages = Vec::new();
        for exam in &exams {
            if let Some(attempt) = latest.get(exam.id.as_str()) {
                if let Some(score) = attempt.score {
                    if exam.total_points > 0 {
                        percentages
                            .push(f64::from(score) / f64::from(exam.total_points) * 100.0);
                    }
                }
            }
        }

        Ok(mean(&percentages))
    }

    /// One attempt per exam: the submitted attempt with the highest
    /// attempt number. Fetched in a single query for all exams at once.
    async fn latest_submitted_attempts<'a>(
        &self,
        student_id: &str,
        exam_ids: impl Iterator<Item = &'a str>,
    ) -> Result<HashMap<String, ExamAttempt>> {
        let ids: Vec<&str> = exam_ids.collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let attempts: Vec<ExamAttempt> = self
            .attempts()
            .find(doc! {
                "exam_id": { "$in": ids },
                "student_id": student_id,
                "status": AttemptStatus::Submitted.as_str(),
            })
            .await
            .context("Failed to query exam attempts")?
            .try_collect()
            .await
            .context("Attempt cursor failure")?;

        let mut latest: HashMap<String, ExamAttempt> = HashMap::new();
        for attempt in attempts {
            match latest.get(&attempt.exam_id) {
                Some(existing) if existing.attempt_number >= attempt.attempt_number => {}
                _ => {
                    latest.insert(attempt.exam_id.clone(), attempt);
                }
            }
        }
        Ok(latest)
    }

    /// Full replace of the derived row; the deterministic key makes the
    /// upsert idempotent.
    async fn persist(
        &self,
        key: String,
        student_id: &str,
        course_id: Option<&str>,
        program_id: Option<&str>,
        exam_score: f64,
        attendance_score: f64,
    ) -> Result<GradeCalculation> {
        let final_grade = self.config.weighted_final(exam_score, attendance_score);
        let (letter, gpa) = self.config.letter_for(final_grade);

        let grade = GradeCalculation {
            id: key,
            student_id: student_id.to_string(),
            course_id: course_id.map(str::to_string),
            program_id: program_id.map(str::to_string),
            exam_score,
            attendance_score,
            final_grade,
            letter_grade: letter.to_string(),
            gpa,
            calculated_at: Utc::now(),
        };

        self.grades()
            .replace_one(doc! { "_id": &grade.id }, &grade)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .context("Failed to upsert grade calculation")?;

        tracing::info!(
            "Grade for student {} ({}): exam {:.1}, attendance {:.1} -> {:.1} ({})",
            student_id,
            grade
                .course_id
                .as_deref()
                .or(grade.program_id.as_deref())
                .unwrap_or("-"),
            exam_score,
            attendance_score,
            final_grade,
            letter
        );

        Ok(grade)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert!(!mean(&[]).is_nan());
    }

    #[test]
    fn mean_is_arithmetic() {
        assert!((mean(&[80.0, 90.0, 100.0]) - 90.0).abs() < 1e-9);
        assert!((mean(&[33.0]) - 33.0).abs() < 1e-9);
    }
}
