use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson};
use mongodb::options::UpdateOptions;
use mongodb::{Collection, Database};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics::ATTENDANCE_MARKED_TOTAL;
use crate::middlewares::auth::JwtClaims;
use crate::models::attendance::{
    AttendanceMark, AttendanceStatus, AttendanceSummary, BatchAttendanceResponse, MarkedBy,
    RosterEntry, ScheduledSession, SessionAttendance, SessionRoster, SessionType,
};
use crate::models::{Course, Enrollment, EnrollmentStatus, EventType};
use crate::services::record_activity_event;
use crate::utils::time::bson_datetime;

pub struct AttendanceService {
    mongo: Database,
}

impl AttendanceService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn sessions(&self) -> Collection<ScheduledSession> {
        self.mongo.collection("scheduled_sessions")
    }

    fn attendance(&self) -> Collection<SessionAttendance> {
        self.mongo.collection("session_attendance")
    }

    fn enrollments(&self) -> Collection<Enrollment> {
        self.mongo.collection("enrollments")
    }

    fn courses(&self) -> Collection<Course> {
        self.mongo.collection("courses")
    }

    /// Student self-check-in. Upserts the (session, student) record as
    /// present/auto; joining twice refreshes the timestamp, nothing else.
    pub async fn join_session(&self, session_id: &str, student_id: &str) -> Result<()> {
        let session = self
            .sessions()
            .find_one(doc! { "_id": session_id })
            .await
            .context("Failed to query scheduled sessions")?
            .ok_or_else(|| ApiError::not_found("Session not found"))?;

        let enrolled = self
            .enrollments()
            .find_one(doc! {
                "student_id": student_id,
                "course_id": &session.course_id,
                "status": EnrollmentStatus::Active.as_str(),
            })
            .await
            .context("Failed to query enrollments")?;
        if enrolled.is_none() {
            return Err(ApiError::forbidden("Not enrolled in this course").into());
        }

        let now = bson_datetime(Utc::now());
        self.attendance()
            .update_one(
                doc! { "session_id": session_id, "student_id": student_id },
                doc! {
                    "$set": {
                        "status": AttendanceStatus::Present.as_str(),
                        "marked_by": MarkedBy::Auto.as_str(),
                        "joined_at": &now,
                        "marked_at": &now,
                    },
                    "$setOnInsert": { "_id": Uuid::new_v4().to_string() },
                },
            )
            .with_options(UpdateOptions::builder().upsert(true).build())
            .await
            .context("Failed to upsert attendance record")?;

        ATTENDANCE_MARKED_TOTAL.with_label_values(&["auto"]).inc();
        tracing::info!(
            "Student {} joined session {} (course {})",
            student_id,
            session_id,
            session.course_id
        );

        record_activity_event(&self.mongo, student_id, EventType::SessionJoin).await;

        Ok(())
    }

    /// Teacher bulk marking. Every record is applied inside one MongoDB
    /// transaction so a failure mid-batch leaves nothing half-written.
    pub async fn mark_batch(
        &self,
        session_id: &str,
        claims: &JwtClaims,
        records: &[AttendanceMark],
    ) -> Result<BatchAttendanceResponse> {
        let session = self
            .sessions()
            .find_one(doc! { "_id": session_id })
            .await
            .context("Failed to query scheduled sessions")?
            .ok_or_else(|| ApiError::not_found("Session not found"))?;

        self.guard_course_staff(claims, &session.course_id).await?;

        let mut txn = self
            .mongo
            .client()
            .start_session()
            .await
            .context("Failed to start client session")?;
        txn.start_transaction()
            .await
            .context("Failed to start transaction")?;

        let now = bson_datetime(Utc::now());
        for record in records {
            let result = self
                .attendance()
                .update_one(
                    doc! { "session_id": session_id, "student_id": &record.student_id },
                    doc! {
                        "$set": {
                            "status": record.status.as_str(),
                            "marked_by": MarkedBy::Teacher.as_str(),
                            "marked_at": &now,
                        },
                        "$setOnInsert": {
                            "_id": Uuid::new_v4().to_string(),
                            "joined_at": Bson::Null,
                        },
                    },
                )
                .with_options(UpdateOptions::builder().upsert(true).build())
                .session(&mut txn)
                .await;

            if let Err(e) = result {
                txn.abort_transaction().await.ok();
                return Err(e).context("Failed to upsert attendance record in batch");
            }
        }

        txn.commit_transaction()
            .await
            .context("Failed to commit attendance batch")?;

        ATTENDANCE_MARKED_TOTAL
            .with_label_values(&["teacher"])
            .inc_by(records.len() as u64);
        tracing::info!(
            "Marked {} attendance records for session {}",
            records.len(),
            session_id
        );

        Ok(BatchAttendanceResponse {
            session_id: session_id.to_string(),
            updated: records.len(),
        })
    }

    /// Every enrolled student with their attendance record; students with
    /// no record read as absent.
    pub async fn session_roster(
        &self,
        session_id: &str,
        claims: &JwtClaims,
    ) -> Result<SessionRoster> {
        let session = self
            .sessions()
            .find_one(doc! { "_id": session_id })
            .await
            .context("Failed to query scheduled sessions")?
            .ok_or_else(|| ApiError::not_found("Session not found"))?;

        self.guard_course_staff(claims, &session.course_id).await?;

        let enrollments: Vec<Enrollment> = self
            .enrollments()
            .find(doc! { "course_id": &session.course_id })
            .await
            .context("Failed to query enrollments")?
            .try_collect()
            .await
            .context("Enrollment cursor failure")?;

        let records: Vec<SessionAttendance> = self
            .attendance()
            .find(doc! { "session_id": session_id })
            .await
            .context("Failed to query attendance records")?
            .try_collect()
            .await
            .context("Attendance cursor failure")?;

        let by_student: std::collections::HashMap<&str, &SessionAttendance> = records
            .iter()
            .map(|r| (r.student_id.as_str(), r))
            .collect();

        let entries = enrollments
            .iter()
            .map(|e| match by_student.get(e.student_id.as_str()) {
                Some(r) => RosterEntry {
                    student_id: e.student_id.clone(),
                    status: r.status,
                    marked_by: Some(r.marked_by),
                    joined_at: r.joined_at,
                },
                None => RosterEntry {
                    student_id: e.student_id.clone(),
                    status: AttendanceStatus::Absent,
                    marked_by: None,
                    joined_at: None,
                },
            })
            .collect();

        Ok(SessionRoster {
            session_id: session.id,
            course_id: session.course_id,
            date: session.date,
            session_type: session.session_type,
            entries,
        })
    }

    /// Attendance percentage over past class-type sessions of a course.
    /// Exam and review sessions do not count toward the percentage.
    pub async fn student_summary(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<AttendanceSummary> {
        let (past_sessions, present) = self.course_counts(student_id, course_id).await?;

        Ok(AttendanceSummary {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
            past_class_sessions: past_sessions,
            present,
            percentage: attendance_percentage(past_sessions, present),
        })
    }

    /// (past class sessions, sessions the student was present in). Shared
    /// with the grade calculator.
    pub(crate) async fn course_counts(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<(u64, u64)> {
        let past_sessions: Vec<ScheduledSession> = self
            .sessions()
            .find(doc! {
                "course_id": course_id,
                "session_type": SessionType::Class.as_str(),
                "date": { "$lte": bson_datetime(Utc::now()) },
            })
            .await
            .context("Failed to query scheduled sessions")?
            .try_collect()
            .await
            .context("Session cursor failure")?;

        if past_sessions.is_empty() {
            return Ok((0, 0));
        }

        let session_ids: Vec<&str> = past_sessions.iter().map(|s| s.id.as_str()).collect();
        let present = self
            .attendance()
            .count_documents(doc! {
                "session_id": { "$in": &session_ids },
                "student_id": student_id,
                "status": AttendanceStatus::Present.as_str(),
            })
            .await
            .context("Failed to count attendance records")?;

        Ok((past_sessions.len() as u64, present))
    }

    /// Admins pass; teachers must own the course.
    async fn guard_course_staff(&self, claims: &JwtClaims, course_id: &str) -> Result<()> {
        if claims.is_admin() {
            return Ok(());
        }
        if !claims.is_teacher() {
            return Err(ApiError::forbidden("Staff role required").into());
        }

        let course = self
            .courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query courses")?
            .ok_or_else(|| ApiError::not_found("Course not found"))?;

        if course.teacher_id != claims.sub {
            return Err(ApiError::forbidden("Not the course teacher").into());
        }
        Ok(())
    }
}

/// Present count over past class sessions, as a percentage. Zero sessions
/// means zero percent, not a division error.
pub(crate) fn attendance_percentage(past_sessions: u64, present: u64) -> f64 {
    if past_sessions == 0 {
        return 0.0;
    }
    present as f64 / past_sessions as f64 * 100.0
}
