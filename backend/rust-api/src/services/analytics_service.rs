use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{Collection, Database};

use crate::error::ApiError;
use crate::metrics::EXPORTS_GENERATED_TOTAL;
use crate::middlewares::auth::JwtClaims;
use crate::models::analytics::{
    AtRiskStudent, CourseAnalytics, CourseProgress, StudentAnalytics, SystemOverview,
    TeacherAnalytics, TrendPoint,
};
use crate::models::attendance::{AttendanceStatus, SessionAttendance, SessionType};
use crate::models::certificate::Certificate;
use crate::models::exam::{AttemptStatus, Exam, ExamAttempt};
use crate::models::grade::GradeCalculation;
use crate::models::{ActivityEvent, Course, Enrollment, EnrollmentStatus, EventType, Program};
use crate::services::attendance_service::{attendance_percentage, AttendanceService};
use crate::utils::time::bson_datetime;

const AT_RISK_ATTENDANCE_THRESHOLD: f64 = 60.0;
const AT_RISK_EXAM_THRESHOLD: f64 = 60.0;

pub struct AnalyticsService {
    mongo: Database,
}

impl AnalyticsService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn enrollments(&self) -> Collection<Enrollment> {
        self.mongo.collection("enrollments")
    }

    fn courses(&self) -> Collection<Course> {
        self.mongo.collection("courses")
    }

    fn programs(&self) -> Collection<Program> {
        self.mongo.collection("programs")
    }

    fn grades(&self) -> Collection<GradeCalculation> {
        self.mongo.collection("grade_calculations")
    }

    fn events(&self) -> Collection<ActivityEvent> {
        self.mongo.collection("activity_events")
    }

    fn certificates(&self) -> Collection<Certificate> {
        self.mongo.collection("certificates")
    }

    fn exams(&self) -> Collection<Exam> {
        self.mongo.collection("exams")
    }

    fn attempts(&self) -> Collection<ExamAttempt> {
        self.mongo.collection("exam_attempts")
    }

    fn attendance(&self) -> Collection<SessionAttendance> {
        self.mongo.collection("session_attendance")
    }

    /// System-wide dashboard. Empty collections produce zeros across the
    /// board, including the fixed seven-entry enrollment trend.
    pub async fn system_overview(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<SystemOverview> {
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::days(30));

        let users_by_role = self
            .group_counts("users", "$role", Document::new())
            .await?;

        let total_enrollments = self
            .enrollments()
            .count_documents(Document::new())
            .await
            .context("Failed to count enrollments")?;
        let active_enrollments = self
            .enrollments()
            .count_documents(doc! { "status": EnrollmentStatus::Active.as_str() })
            .await
            .context("Failed to count active enrollments")?;

        let certificates_issued = self
            .certificates()
            .count_documents(doc! {
                "issued_at": { "$gte": bson_datetime(from), "$lte": bson_datetime(to) },
            })
            .await
            .context("Failed to count certificates")?;

        let events_by_type = self
            .group_counts(
                "activity_events",
                "$event_type",
                doc! { "created_at": { "$gte": bson_datetime(from), "$lte": bson_datetime(to) } },
            )
            .await?;

        // Distinct users with a login event in the last 24 hours
        let day_ago = Utc::now() - Duration::hours(24);
        let daily_active_users = self
            .events()
            .distinct(
                "user_id",
                doc! {
                    "event_type": EventType::Login.as_str(),
                    "created_at": { "$gte": bson_datetime(day_ago) },
                },
            )
            .await
            .context("Failed to query login events")?
            .len() as u64;

        // Seven daily buckets, oldest first. One count per day; the window
        // is small enough that a grouped query buys nothing.
        let mut enrollment_trend = Vec::with_capacity(7);
        let today = Utc::now().date_naive();
        for days_back in (0..7).rev() {
            let day = today - Duration::days(days_back);
            let start = day
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always valid")
                .and_utc();
            let end = start + Duration::days(1);
            let count = self
                .enrollments()
                .count_documents(doc! {
                    "created_at": { "$gte": bson_datetime(start), "$lt": bson_datetime(end) },
                })
                .await
                .context("Failed to count enrollments for trend")?;
            enrollment_trend.push(TrendPoint {
                date: day.format("%Y-%m-%d").to_string(),
                count,
            });
        }

        Ok(SystemOverview {
            users_by_role,
            total_enrollments,
            active_enrollments,
            certificates_issued,
            events_by_type,
            daily_active_users,
            enrollment_trend,
        })
    }

    /// Per-course rollup. Per-student attendance and exam figures come from
    /// grouped queries over the whole course, one round trip each.
    pub async fn course_analytics(
        &self,
        course_id: &str,
        claims: &JwtClaims,
    ) -> Result<CourseAnalytics> {
        let course = self
            .courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query courses")?
            .ok_or_else(|| ApiError::not_found("Course not found"))?;

        if !claims.is_admin() && course.teacher_id != claims.sub {
            return Err(ApiError::forbidden("Not the course teacher").into());
        }

        let enrollments: Vec<Enrollment> = self
            .enrollments()
            .find(doc! { "course_id": course_id })
            .await
            .context("Failed to query enrollments")?
            .try_collect()
            .await
            .context("Enrollment cursor failure")?;
        let enrollment_count = enrollments.len() as u64;
        let active_enrollments = enrollments
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Active)
            .count() as u64;

        // Past class sessions define the attendance denominator
        let session_ids: Vec<String> = self
            .mongo
            .collection::<crate::models::attendance::ScheduledSession>("scheduled_sessions")
            .find(doc! {
                "course_id": course_id,
                "session_type": SessionType::Class.as_str(),
                "date": { "$lte": bson_datetime(Utc::now()) },
            })
            .await
            .context("Failed to query scheduled sessions")?
            .try_collect::<Vec<_>>()
            .await
            .context("Session cursor failure")?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let session_count = session_ids.len() as u64;
        let attendance_records = if session_ids.is_empty() {
            0
        } else {
            self.attendance()
                .count_documents(doc! {
                    "session_id": { "$in": &session_ids },
                    "status": AttendanceStatus::Present.as_str(),
                })
                .await
                .context("Failed to count attendance records")?
        };

        let attendance_rate = if session_count > 0 && enrollment_count > 0 {
            attendance_records as f64 / (session_count * enrollment_count) as f64 * 100.0
        } else {
            0.0
        };

        // Per-student present counts, one grouped query
        let present_by_student: HashMap<String, u64> = if session_ids.is_empty() {
            HashMap::new()
        } else {
            self.group_counts(
                "session_attendance",
                "$student_id",
                doc! {
                    "session_id": { "$in": &session_ids },
                    "status": AttendanceStatus::Present.as_str(),
                },
            )
            .await?
        };

        // All submitted attempts for the course's exams, one query; exam
        // averages are folded in memory against the exam point totals.
        let exams: Vec<Exam> = self
            .exams()
            .find(doc! { "course_id": course_id, "is_published": true })
            .await
            .context("Failed to query exams")?
            .try_collect()
            .await
            .context("Exam cursor failure")?;
        let points_by_exam: HashMap<&str, i32> = exams
            .iter()
            .map(|e| (e.id.as_str(), e.total_points))
            .collect();

        let mut percentages_by_student: HashMap<String, Vec<f64>> = HashMap::new();
        let mut all_percentages = Vec::new();
        if !exams.is_empty() {
            let exam_ids: Vec<&str> = exams.iter().map(|e| e.id.as_str()).collect();
            let attempts: Vec<ExamAttempt> = self
                .attempts()
                .find(doc! {
                    "exam_id": { "$in": exam_ids },
                    "status": AttemptStatus::Submitted.as_str(),
                })
                .await
                .context("Failed to query exam attempts")?
                .try_collect()
                .await
                .context("Attempt cursor failure")?;

            for attempt in &attempts {
                let (Some(score), Some(&total)) =
                    (attempt.score, points_by_exam.get(attempt.exam_id.as_str()))
                else {
                    continue;
                };
                if total > 0 {
                    let pct = f64::from(score) / f64::from(total) * 100.0;
                    percentages_by_student
                        .entry(attempt.student_id.clone())
                        .or_default()
                        .push(pct);
                    all_percentages.push(pct);
                }
            }
        }
        let average_exam_score = mean(&all_percentages);

        let grades: Vec<GradeCalculation> = self
            .grades()
            .find(doc! { "course_id": course_id })
            .await
            .context("Failed to query grade calculations")?
            .try_collect()
            .await
            .context("Grade cursor failure")?;

        let mut grade_distribution: HashMap<String, u64> = HashMap::new();
        for grade in &grades {
            *grade_distribution.entry(grade.letter_grade.clone()).or_default() += 1;
        }
        let completion_rate = if grades.is_empty() {
            0.0
        } else {
            grades.iter().filter(|g| g.letter_grade != "F").count() as f64 / grades.len() as f64
        };

        let mut at_risk = Vec::new();
        for enrollment in &enrollments {
            let present = present_by_student
                .get(&enrollment.student_id)
                .copied()
                .unwrap_or(0);
            let attendance_pct = attendance_percentage(session_count, present);
            let exam_avg = percentages_by_student
                .get(&enrollment.student_id)
                .map(|p| mean(p))
                .unwrap_or(0.0);

            if attendance_pct < AT_RISK_ATTENDANCE_THRESHOLD
                || exam_avg < AT_RISK_EXAM_THRESHOLD
            {
                at_risk.push(AtRiskStudent {
                    student_id: enrollment.student_id.clone(),
                    attendance_percentage: attendance_pct,
                    exam_average: exam_avg,
                });
            }
        }

        Ok(CourseAnalytics {
            course_id: course_id.to_string(),
            enrollment_count,
            active_enrollments,
            attendance_rate,
            average_exam_score,
            grade_distribution,
            completion_rate,
            at_risk,
        })
    }

    /// Per-student rollup: overall GPA, per-course progress, latest events.
    pub async fn student_analytics(&self, student_id: &str) -> Result<StudentAnalytics> {
        let grades: Vec<GradeCalculation> = self
            .grades()
            .find(doc! { "student_id": student_id })
            .await
            .context("Failed to query grade calculations")?
            .try_collect()
            .await
            .context("Grade cursor failure")?;

        let gpa = mean(&grades.iter().map(|g| g.gpa).collect::<Vec<_>>());
        let grades_by_course: HashMap<&str, &GradeCalculation> = grades
            .iter()
            .filter_map(|g| g.course_id.as_deref().map(|c| (c, g)))
            .collect();

        let enrollments: Vec<Enrollment> = self
            .enrollments()
            .find(doc! { "student_id": student_id })
            .await
            .context("Failed to query enrollments")?
            .try_collect()
            .await
            .context("Enrollment cursor failure")?;

        let attendance = AttendanceService::new(self.mongo.clone());
        let mut courses = Vec::with_capacity(enrollments.len());
        for enrollment in &enrollments {
            let (past, present) = attendance
                .course_counts(student_id, &enrollment.course_id)
                .await?;
            let grade = grades_by_course.get(enrollment.course_id.as_str());
            courses.push(CourseProgress {
                course_id: enrollment.course_id.clone(),
                letter_grade: grade.map(|g| g.letter_grade.clone()),
                final_grade: grade.map(|g| g.final_grade),
                attendance_percentage: attendance_percentage(past, present),
                exam_average: grade.map(|g| g.exam_score).unwrap_or(0.0),
            });
        }

        let recent_activity: Vec<ActivityEvent> = self
            .events()
            .find(doc! { "user_id": student_id })
            .sort(doc! { "created_at": -1 })
            .limit(10)
            .await
            .context("Failed to query activity events")?
            .try_collect()
            .await
            .context("Event cursor failure")?;

        Ok(StudentAnalytics {
            student_id: student_id.to_string(),
            gpa,
            courses,
            recent_activity,
        })
    }

    /// Aggregate counts across everything a teacher owns.
    pub async fn teacher_analytics(&self, teacher_id: &str) -> Result<TeacherAnalytics> {
        let course_ids: Vec<String> = self
            .courses()
            .find(doc! { "teacher_id": teacher_id })
            .await
            .context("Failed to query courses")?
            .try_collect::<Vec<_>>()
            .await
            .context("Course cursor failure")?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let program_ids: Vec<String> = self
            .programs()
            .find(doc! { "teacher_id": teacher_id })
            .await
            .context("Failed to query programs")?
            .try_collect::<Vec<_>>()
            .await
            .context("Program cursor failure")?
            .into_iter()
            .map(|p| p.id)
            .collect();

        let (total_enrollments, total_sessions, certificates_issued) = if course_ids.is_empty()
            && program_ids.is_empty()
        {
            (0, 0, 0)
        } else {
            let enrollments = if course_ids.is_empty() {
                0
            } else {
                self.enrollments()
                    .count_documents(doc! { "course_id": { "$in": &course_ids } })
                    .await
                    .context("Failed to count enrollments")?
            };
            let sessions = if course_ids.is_empty() {
                0
            } else {
                self.mongo
                    .collection::<Document>("scheduled_sessions")
                    .count_documents(doc! { "course_id": { "$in": &course_ids } })
                    .await
                    .context("Failed to count sessions")?
            };
            let certificates = self
                .certificates()
                .count_documents(doc! {
                    "$or": [
                        { "course_id": { "$in": &course_ids } },
                        { "program_id": { "$in": &program_ids } },
                    ],
                })
                .await
                .context("Failed to count certificates")?;
            (enrollments, sessions, certificates)
        };

        Ok(TeacherAnalytics {
            teacher_id: teacher_id.to_string(),
            course_count: course_ids.len() as u64,
            program_count: program_ids.len() as u64,
            total_enrollments,
            total_sessions,
            certificates_issued,
        })
    }

    /// Synchronous CSV export. Every free-text cell is sanitized against
    /// spreadsheet formula injection.
    pub async fn export_csv(&self, export_type: &str) -> Result<String> {
        let csv = match export_type {
            "grades" => {
                let rows: Vec<GradeCalculation> = self
                    .grades()
                    .find(Document::new())
                    .await
                    .context("Failed to query grade calculations")?
                    .try_collect()
                    .await
                    .context("Grade cursor failure")?;

                let mut out = String::from(
                    "student_id,course_id,program_id,exam_score,attendance_score,final_grade,letter_grade,gpa\n",
                );
                for g in &rows {
                    out.push_str(&format!(
                        "{},{},{},{:.2},{:.2},{:.2},{},{:.1}\n",
                        sanitize_cell(&g.student_id),
                        sanitize_cell(g.course_id.as_deref().unwrap_or("")),
                        sanitize_cell(g.program_id.as_deref().unwrap_or("")),
                        g.exam_score,
                        g.attendance_score,
                        g.final_grade,
                        sanitize_cell(&g.letter_grade),
                        g.gpa,
                    ));
                }
                out
            }
            "attendance" => {
                let rows: Vec<SessionAttendance> = self
                    .attendance()
                    .find(Document::new())
                    .await
                    .context("Failed to query attendance records")?
                    .try_collect()
                    .await
                    .context("Attendance cursor failure")?;

                let mut out = String::from("session_id,student_id,status,marked_by,marked_at\n");
                for r in &rows {
                    out.push_str(&format!(
                        "{},{},{},{},{}\n",
                        sanitize_cell(&r.session_id),
                        sanitize_cell(&r.student_id),
                        r.status.as_str(),
                        r.marked_by.as_str(),
                        r.marked_at.to_rfc3339(),
                    ));
                }
                out
            }
            "enrollments" => {
                let rows: Vec<Enrollment> = self
                    .enrollments()
                    .find(Document::new())
                    .await
                    .context("Failed to query enrollments")?
                    .try_collect()
                    .await
                    .context("Enrollment cursor failure")?;

                let mut out = String::from("student_id,course_id,status,created_at\n");
                for e in &rows {
                    out.push_str(&format!(
                        "{},{},{},{}\n",
                        sanitize_cell(&e.student_id),
                        sanitize_cell(&e.course_id),
                        e.status.as_str(),
                        e.created_at.to_rfc3339(),
                    ));
                }
                out
            }
            other => {
                return Err(ApiError::validation(format!(
                    "Unknown export type: {}",
                    other
                ))
                .into());
            }
        };

        EXPORTS_GENERATED_TOTAL
            .with_label_values(&[export_type])
            .inc();

        Ok(csv)
    }

    /// `$group`-and-count over one field, returned as a name -> count map.
    async fn group_counts(
        &self,
        collection: &str,
        group_field: &str,
        filter: Document,
    ) -> Result<HashMap<String, u64>> {
        let mut pipeline = Vec::new();
        if !filter.is_empty() {
            pipeline.push(doc! { "$match": filter });
        }
        pipeline.push(doc! {
            "$group": {
                "_id": group_field,
                "count": { "$sum": 1 },
            }
        });

        let mut cursor = self
            .mongo
            .collection::<Document>(collection)
            .aggregate(pipeline)
            .await
            .context("Aggregation failed")?;

        let mut counts = HashMap::new();
        while let Some(doc) = cursor.try_next().await.context("Aggregation cursor failure")? {
            let key = doc.get_str("_id").unwrap_or("unknown").to_string();
            let count = doc
                .get_i64("count")
                .or_else(|_| doc.get_i32("count").map(i64::from))
                .unwrap_or(0);
            counts.insert(key, count.max(0) as u64);
        }
        Ok(counts)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Strip characters that could start a spreadsheet formula or break CSV
/// structure; long values are truncated.
fn sanitize_cell(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || "-_.:".contains(*c))
        .take(100)
        .collect::<String>()
        .trim_start_matches('-')
        .to_string()
}
