// ==========================================
// 学习成果达成度引擎 - 达成度只读仓储
// ==========================================
// 职责: 按计算范围加载扁平行集 (OutcomeDataset)
// 红线: Repository 不含业务逻辑 (不判定、不去重)
// 约束: 所有查询使用参数化
// ==========================================

use crate::domain::course::{CourseInfo, CriteriaGrade};
use crate::domain::dataset::{
    AssignmentCloLinkRow, AssignmentRow, AttainmentScope, CloOutcomeLinkRow, CloRow,
    EnrollmentRow, OutcomeDataset, ScoreRow,
};
use crate::domain::types::{EnrollmentStatus, OutcomeKind};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const COURSE_COLUMNS: &str = r#"
    course_id, programme_id, code, name, year, semester,
    expected_passing_clo_percentage,
    grade_a, grade_bp, grade_b, grade_cp, grade_c, grade_dp, grade_d, grade_f
"#;

// ==========================================
// AttainmentRepository
// ==========================================
pub struct AttainmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AttainmentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 加载计算范围内的全部输入
    ///
    /// # 返回
    /// - Ok(dataset): 范围存在 (可能没有任何课程)
    /// - Err(NotFound): 课程 / 学生 / 专业不存在
    pub fn load_dataset(&self, scope: &AttainmentScope) -> RepositoryResult<OutcomeDataset> {
        let conn = self.get_conn()?;

        let (courses, student_filter) = match scope {
            AttainmentScope::Course(course_id) => {
                let course = conn
                    .query_row(
                        &format!("SELECT {} FROM course WHERE course_id = ?1", COURSE_COLUMNS),
                        params![course_id],
                        map_course_row,
                    )
                    .optional()?
                    .ok_or_else(|| RepositoryError::NotFound {
                        entity: "course".to_string(),
                        id: course_id.to_string(),
                    })?;
                (vec![course], None)
            }
            AttainmentScope::Student(student_id) => {
                ensure_exists(&conn, "student", "student_id", *student_id)?;
                let mut stmt = conn.prepare(&format!(
                    r#"
                    SELECT {} FROM course
                    WHERE course_id IN (
                        SELECT course_id FROM enrollment
                        WHERE student_id = ?1 AND status = 'ENROLL'
                    )
                    ORDER BY code, year, semester, course_id
                    "#,
                    COURSE_COLUMNS
                ))?;
                let courses = stmt
                    .query_map(params![student_id], map_course_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                (courses, Some(*student_id))
            }
            AttainmentScope::Programme {
                programme_id,
                from_year,
                to_year,
            } => {
                ensure_exists(&conn, "programme", "programme_id", *programme_id)?;
                let mut stmt = conn.prepare(&format!(
                    r#"
                    SELECT {} FROM course
                    WHERE programme_id = ?1 AND year BETWEEN ?2 AND ?3
                    ORDER BY code, year, semester, course_id
                    "#,
                    COURSE_COLUMNS
                ))?;
                let courses = stmt
                    .query_map(params![programme_id, from_year, to_year], map_course_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                (courses, None)
            }
            AttainmentScope::AllCourses => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM course ORDER BY code, year, semester, course_id",
                    COURSE_COLUMNS
                ))?;
                let courses = stmt
                    .query_map([], map_course_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                (courses, None)
            }
        };

        let course_ids: Vec<i64> = courses.iter().map(|c| c.course_id).collect();
        let dataset = OutcomeDataset {
            enrollments: load_enrollments(&conn, &course_ids, student_filter)?,
            assignments: load_assignments(&conn, &course_ids)?,
            clos: load_clos(&conn, &course_ids)?,
            assignment_clo_links: load_assignment_clo_links(&conn, &course_ids)?,
            clo_outcome_links: load_clo_outcome_links(&conn, &course_ids)?,
            scores: load_scores(&conn, &course_ids, student_filter)?,
            courses,
        };

        tracing::debug!(
            scope = %scope.describe(),
            courses = dataset.courses.len(),
            enrollments = dataset.enrollments.len(),
            assignments = dataset.assignments.len(),
            clos = dataset.clos.len(),
            scores = dataset.scores.len(),
            "达成度数据集加载完成"
        );

        Ok(dataset)
    }

    /// 学生学号 (学生不存在时返回 None)
    pub fn find_student_code(&self, student_id: i64) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        conn.query_row(
            "SELECT code FROM student WHERE student_id = ?1",
            params![student_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| e.into())
    }
}

fn ensure_exists(conn: &Connection, table: &str, key_column: &str, id: i64) -> RepositoryResult<()> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE {} = ?1", table, key_column),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(RepositoryError::NotFound {
            entity: table.to_string(),
            id: id.to_string(),
        }),
    }
}

/// 以 `{ids}` 占位的 IN 查询;`{student}` 替换为可选的学生过滤条件
fn query_by_course_ids<T, F>(
    conn: &Connection,
    sql_template: &str,
    course_ids: &[i64],
    student_filter: Option<(&str, i64)>,
    map: F,
) -> RepositoryResult<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    if course_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; course_ids.len()].join(", ");
    let mut values: Vec<i64> = course_ids.to_vec();
    let student_clause = match student_filter {
        Some((column, student_id)) => {
            values.push(student_id);
            format!("AND {} = ?", column)
        }
        None => String::new(),
    };

    let sql = sql_template
        .replace("{ids}", &placeholders)
        .replace("{student}", &student_clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_enrollments(
    conn: &Connection,
    course_ids: &[i64],
    student_id: Option<i64>,
) -> RepositoryResult<Vec<EnrollmentRow>> {
    query_by_course_ids(
        conn,
        r#"
        SELECT e.course_id, e.student_id, s.code, e.status
        FROM enrollment e
        JOIN student s ON s.student_id = e.student_id
        WHERE e.course_id IN ({ids}) {student}
        ORDER BY e.course_id, e.student_id
        "#,
        course_ids,
        student_id.map(|id| ("e.student_id", id)),
        |row| {
            Ok(EnrollmentRow {
                course_id: row.get(0)?,
                student_id: row.get(1)?,
                student_code: row.get(2)?,
                status: EnrollmentStatus::from_str(&row.get::<_, String>(3)?),
            })
        },
    )
}

fn load_assignments(conn: &Connection, course_ids: &[i64]) -> RepositoryResult<Vec<AssignmentRow>> {
    query_by_course_ids(
        conn,
        r#"
        SELECT a.assignment_id, g.course_id, g.group_id, g.weight, a.name,
               a.max_score, a.expected_score_percentage, a.is_included_in_clo
        FROM assignment a
        JOIN assignment_group g ON g.group_id = a.group_id
        WHERE g.course_id IN ({ids}) {student}
        ORDER BY a.assignment_id
        "#,
        course_ids,
        None,
        |row| {
            Ok(AssignmentRow {
                assignment_id: row.get(0)?,
                course_id: row.get(1)?,
                group_id: row.get(2)?,
                group_weight: row.get(3)?,
                name: row.get(4)?,
                max_score: row.get(5)?,
                expected_score_percentage: row.get(6)?,
                is_included_in_clo: row.get::<_, i64>(7)? != 0,
            })
        },
    )
}

fn load_clos(conn: &Connection, course_ids: &[i64]) -> RepositoryResult<Vec<CloRow>> {
    query_by_course_ids(
        conn,
        r#"
        SELECT clo_id, course_id, code, expected_passing_assignment_percentage
        FROM clo
        WHERE course_id IN ({ids}) {student}
        ORDER BY clo_id
        "#,
        course_ids,
        None,
        |row| {
            Ok(CloRow {
                clo_id: row.get(0)?,
                course_id: row.get(1)?,
                code: row.get(2)?,
                expected_passing_assignment_percentage: row.get(3)?,
            })
        },
    )
}

fn load_assignment_clo_links(
    conn: &Connection,
    course_ids: &[i64],
) -> RepositoryResult<Vec<AssignmentCloLinkRow>> {
    query_by_course_ids(
        conn,
        r#"
        SELECT ac.assignment_id, ac.clo_id
        FROM assignment_clo ac
        JOIN clo c ON c.clo_id = ac.clo_id
        WHERE c.course_id IN ({ids}) {student}
        ORDER BY ac.clo_id, ac.assignment_id
        "#,
        course_ids,
        None,
        |row| {
            Ok(AssignmentCloLinkRow {
                assignment_id: row.get(0)?,
                clo_id: row.get(1)?,
            })
        },
    )
}

fn load_clo_outcome_links(
    conn: &Connection,
    course_ids: &[i64],
) -> RepositoryResult<Vec<CloOutcomeLinkRow>> {
    let mut links = query_by_course_ids(
        conn,
        r#"
        SELECT cp.clo_id, p.po_id, p.code
        FROM clo_po cp
        JOIN po p ON p.po_id = cp.po_id
        JOIN clo c ON c.clo_id = cp.clo_id
        WHERE c.course_id IN ({ids}) {student}
        ORDER BY cp.clo_id, p.po_id
        "#,
        course_ids,
        None,
        |row| {
            Ok(CloOutcomeLinkRow {
                clo_id: row.get(0)?,
                kind: OutcomeKind::Po,
                outcome_id: row.get(1)?,
                outcome_code: row.get(2)?,
                via_sub_id: None,
            })
        },
    )?;

    // PLO / SO 经子成果关联,同一 CLO 可能出现多行,去重交给图构建
    links.extend(query_by_course_ids(
        conn,
        r#"
        SELECT cs.clo_id, p.plo_id, p.code, sp.sub_plo_id
        FROM clo_sub_plo cs
        JOIN sub_plo sp ON sp.sub_plo_id = cs.sub_plo_id
        JOIN plo p ON p.plo_id = sp.plo_id
        JOIN clo c ON c.clo_id = cs.clo_id
        WHERE c.course_id IN ({ids}) {student}
        ORDER BY cs.clo_id, p.plo_id, sp.sub_plo_id
        "#,
        course_ids,
        None,
        |row| {
            Ok(CloOutcomeLinkRow {
                clo_id: row.get(0)?,
                kind: OutcomeKind::Plo,
                outcome_id: row.get(1)?,
                outcome_code: row.get(2)?,
                via_sub_id: row.get(3)?,
            })
        },
    )?);

    links.extend(query_by_course_ids(
        conn,
        r#"
        SELECT cs.clo_id, s.so_id, s.code, ss.sub_so_id
        FROM clo_sub_so cs
        JOIN sub_so ss ON ss.sub_so_id = cs.sub_so_id
        JOIN so s ON s.so_id = ss.so_id
        JOIN clo c ON c.clo_id = cs.clo_id
        WHERE c.course_id IN ({ids}) {student}
        ORDER BY cs.clo_id, s.so_id, ss.sub_so_id
        "#,
        course_ids,
        None,
        |row| {
            Ok(CloOutcomeLinkRow {
                clo_id: row.get(0)?,
                kind: OutcomeKind::So,
                outcome_id: row.get(1)?,
                outcome_code: row.get(2)?,
                via_sub_id: row.get(3)?,
            })
        },
    )?);

    Ok(links)
}

fn load_scores(
    conn: &Connection,
    course_ids: &[i64],
    student_id: Option<i64>,
) -> RepositoryResult<Vec<ScoreRow>> {
    query_by_course_ids(
        conn,
        r#"
        SELECT sc.student_id, sc.assignment_id, sc.score
        FROM score sc
        JOIN assignment a ON a.assignment_id = sc.assignment_id
        JOIN assignment_group g ON g.group_id = a.group_id
        WHERE g.course_id IN ({ids}) {student}
        ORDER BY sc.student_id, sc.assignment_id
        "#,
        course_ids,
        student_id.map(|id| ("sc.student_id", id)),
        |row| {
            Ok(ScoreRow {
                student_id: row.get(0)?,
                assignment_id: row.get(1)?,
                score: row.get(2)?,
            })
        },
    )
}

pub(crate) fn map_course_row(row: &Row) -> rusqlite::Result<CourseInfo> {
    Ok(CourseInfo {
        course_id: row.get(0)?,
        programme_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        year: row.get(4)?,
        semester: row.get(5)?,
        expected_passing_clo_percentage: row.get(6)?,
        criteria_grade: CriteriaGrade::from_cutoffs([
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
            row.get(11)?,
            row.get(12)?,
            row.get(13)?,
            row.get(14)?,
        ]),
    })
}
