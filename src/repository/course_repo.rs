// ==========================================
// 学习成果达成度引擎 - 课程写仓储
// ==========================================
// 职责: 课程阈值 / 等级分数线 / 成绩 / 选课状态的写入
// 说明: 写入成功后发布失效事件;事件发布失败只记日志,不影响写入
// ==========================================

use crate::domain::course::{CourseInfo, CriteriaGrade};
use crate::domain::types::EnrollmentStatus;
use crate::engine::events::{OptionalEventPublisher, OutcomeEvent, OutcomeEventType};
use crate::repository::attainment_repo::map_course_row;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const EVENT_SOURCE: &str = "CourseRepository";

pub struct CourseRepository {
    conn: Arc<Mutex<Connection>>,
    event_publisher: OptionalEventPublisher,
}

impl CourseRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            event_publisher: OptionalEventPublisher::none(),
        }
    }

    pub fn with_event_publisher(conn: Arc<Mutex<Connection>>, event_publisher: OptionalEventPublisher) -> Self {
        Self { conn, event_publisher }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn publish(&self, event: OutcomeEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.event_publisher.publish(event) {
            tracing::warn!(
                "CourseRepository: 失效事件发布失败 - event_type={}, error={}",
                event_type.as_str(),
                e
            );
        }
    }

    pub fn find_by_id(&self, course_id: i64) -> RepositoryResult<Option<CourseInfo>> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT course_id, programme_id, code, name, year, semester,
                   expected_passing_clo_percentage,
                   grade_a, grade_bp, grade_b, grade_cp, grade_c, grade_dp, grade_d, grade_f
            FROM course WHERE course_id = ?1
            "#,
            params![course_id],
            map_course_row,
        )
        .optional()
        .map_err(|e| e.into())
    }

    /// 更新等级分数线
    ///
    /// # 错误
    /// - ValidationError: 分数线非单调或超出 [0, 100]
    /// - NotFound: 课程不存在
    pub fn update_criteria_grade(&self, course_id: i64, criteria: &CriteriaGrade) -> RepositoryResult<()> {
        criteria.validate().map_err(RepositoryError::ValidationError)?;

        let affected = {
            let conn = self.get_conn()?;
            conn.execute(
                r#"
                UPDATE course
                SET grade_a = ?2, grade_bp = ?3, grade_b = ?4, grade_cp = ?5,
                    grade_c = ?6, grade_dp = ?7, grade_d = ?8, grade_f = ?9
                WHERE course_id = ?1
                "#,
                params![
                    course_id,
                    criteria.a,
                    criteria.bp,
                    criteria.b,
                    criteria.cp,
                    criteria.c,
                    criteria.dp,
                    criteria.d,
                    criteria.f
                ],
            )?
        };
        ensure_affected(affected, "course", course_id)?;

        self.publish(
            OutcomeEvent::new(OutcomeEventType::CourseChanged, Some(EVENT_SOURCE.to_string()))
                .for_course(course_id),
        );
        Ok(())
    }

    /// 更新 PO/PLO/SO 层级阈值
    pub fn update_expected_passing_clo_percentage(&self, course_id: i64, percentage: f64) -> RepositoryResult<()> {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(RepositoryError::FieldValueError {
                field: "expected_passing_clo_percentage".to_string(),
                message: format!("{} 超出 [0, 100]", percentage),
            });
        }

        let affected = {
            let conn = self.get_conn()?;
            conn.execute(
                "UPDATE course SET expected_passing_clo_percentage = ?2 WHERE course_id = ?1",
                params![course_id, percentage],
            )?
        };
        ensure_affected(affected, "course", course_id)?;

        self.publish(
            OutcomeEvent::new(OutcomeEventType::CourseChanged, Some(EVENT_SOURCE.to_string()))
                .for_course(course_id),
        );
        Ok(())
    }

    /// 录入或覆盖成绩
    pub fn record_score(&self, student_id: i64, assignment_id: i64, score: f64) -> RepositoryResult<()> {
        if !score.is_finite() || score < 0.0 {
            return Err(RepositoryError::FieldValueError {
                field: "score".to_string(),
                message: format!("成绩无效: {}", score),
            });
        }

        let course_id: Option<i64> = {
            let conn = self.get_conn()?;
            conn.execute(
                r#"
                INSERT INTO score (student_id, assignment_id, score) VALUES (?1, ?2, ?3)
                ON CONFLICT(student_id, assignment_id) DO UPDATE SET score = excluded.score
                "#,
                params![student_id, assignment_id, score],
            )?;
            conn.query_row(
                r#"
                SELECT g.course_id FROM assignment a
                JOIN assignment_group g ON g.group_id = a.group_id
                WHERE a.assignment_id = ?1
                "#,
                params![assignment_id],
                |row| row.get(0),
            )
            .optional()?
        };

        let mut event = OutcomeEvent::new(OutcomeEventType::ScoreChanged, Some(EVENT_SOURCE.to_string()))
            .for_entity(assignment_id);
        if let Some(course_id) = course_id {
            event = event.for_course(course_id);
        }
        self.publish(event);
        Ok(())
    }

    /// 选课 / 退课
    pub fn set_enrollment_status(
        &self,
        course_id: i64,
        student_id: i64,
        status: EnrollmentStatus,
    ) -> RepositoryResult<()> {
        {
            let conn = self.get_conn()?;
            conn.execute(
                r#"
                INSERT INTO enrollment (course_id, student_id, status) VALUES (?1, ?2, ?3)
                ON CONFLICT(course_id, student_id) DO UPDATE SET status = excluded.status
                "#,
                params![course_id, student_id, status.as_str()],
            )?;
        }

        self.publish(
            OutcomeEvent::new(OutcomeEventType::EnrollmentChanged, Some(EVENT_SOURCE.to_string()))
                .for_course(course_id)
                .for_entity(student_id),
        );
        Ok(())
    }
}

fn ensure_affected(affected: usize, entity: &str, id: i64) -> RepositoryResult<()> {
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}
