// ==========================================
// 学习成果达成度引擎 - 达成度快照仓储
// ==========================================
// 职责: plo_course_snapshot / po_course_snapshot 的读取与整表替换
// 红线: 只做整表替换,不做增量修补
// ==========================================

use crate::domain::types::SnapshotKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// 快照行: 一门课程 × 一个 PLO / PO
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSnapshotRow {
    pub course_id: i64,
    pub programme_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub year: i32,
    pub semester: i32,
    pub outcome_id: i64,
    pub outcome_code: String,
    pub pass_count: i64,
    pub fail_count: i64,
    pub not_applicable_count: i64,
    pub passing_percentage: Option<f64>,
    pub refresh_id: String,
    pub refreshed_at: String,
}

pub struct SnapshotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SnapshotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按专业读取快照,顺序: 课程代码 → 学年 → 学期 → 成果代码
    pub fn list_by_programme(
        &self,
        kind: SnapshotKind,
        programme_id: i64,
    ) -> RepositoryResult<Vec<OutcomeSnapshotRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT course_id, programme_id, course_code, course_name, year, semester,
                   outcome_id, outcome_code, pass_count, fail_count, not_applicable_count,
                   passing_percentage, refresh_id, refreshed_at
            FROM {}
            WHERE programme_id = ?1
            ORDER BY course_code, year, semester, course_id, outcome_code, outcome_id
            "#,
            kind.table_name()
        ))?;
        let rows = stmt
            .query_map(params![programme_id], map_snapshot_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 快照总行数
    pub fn count(&self, kind: SnapshotKind) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// 在调用方事务内整表替换快照: 先 DELETE 全部,再 INSERT 新一代
///
/// 事务提交前其他连接只能看到旧一代数据。
pub fn replace_snapshot(
    tx: &Transaction,
    kind: SnapshotKind,
    rows: &[OutcomeSnapshotRow],
) -> RepositoryResult<usize> {
    tx.execute(&format!("DELETE FROM {}", kind.table_name()), [])?;

    let mut stmt = tx.prepare(&format!(
        r#"
        INSERT INTO {} (
            course_id, programme_id, course_code, course_name, year, semester,
            outcome_id, outcome_code, pass_count, fail_count, not_applicable_count,
            passing_percentage, refresh_id, refreshed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        kind.table_name()
    ))?;

    for row in rows {
        stmt.execute(params![
            row.course_id,
            row.programme_id,
            row.course_code,
            row.course_name,
            row.year,
            row.semester,
            row.outcome_id,
            row.outcome_code,
            row.pass_count,
            row.fail_count,
            row.not_applicable_count,
            row.passing_percentage,
            row.refresh_id,
            row.refreshed_at,
        ])?;
    }

    Ok(rows.len())
}

fn map_snapshot_row(row: &Row) -> rusqlite::Result<OutcomeSnapshotRow> {
    Ok(OutcomeSnapshotRow {
        course_id: row.get(0)?,
        programme_id: row.get(1)?,
        course_code: row.get(2)?,
        course_name: row.get(3)?,
        year: row.get(4)?,
        semester: row.get(5)?,
        outcome_id: row.get(6)?,
        outcome_code: row.get(7)?,
        pass_count: row.get(8)?,
        fail_count: row.get(9)?,
        not_applicable_count: row.get(10)?,
        passing_percentage: row.get(11)?,
        refresh_id: row.get(12)?,
        refreshed_at: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn row(course_id: i64, code: &str, outcome_id: i64, refresh_id: &str) -> OutcomeSnapshotRow {
        OutcomeSnapshotRow {
            course_id,
            programme_id: 1,
            course_code: code.to_string(),
            course_name: code.to_string(),
            year: 2024,
            semester: 1,
            outcome_id,
            outcome_code: format!("PLO{}", outcome_id),
            pass_count: 1,
            fail_count: 1,
            not_applicable_count: 0,
            passing_percentage: Some(50.0),
            refresh_id: refresh_id.to_string(),
            refreshed_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_replace_is_wholesale() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let repo = SnapshotRepository::new(conn.clone());

        {
            let mut c = conn.lock().unwrap();
            let tx = c.transaction().unwrap();
            replace_snapshot(&tx, SnapshotKind::Plo, &[row(2, "CS201", 1, "r1"), row(1, "CS101", 1, "r1")]).unwrap();
            tx.commit().unwrap();
        }
        let rows = repo.list_by_programme(SnapshotKind::Plo, 1).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].course_code, "CS101");

        {
            let mut c = conn.lock().unwrap();
            let tx = c.transaction().unwrap();
            replace_snapshot(&tx, SnapshotKind::Plo, &[row(3, "CS301", 2, "r2")]).unwrap();
            tx.commit().unwrap();
        }
        let rows = repo.list_by_programme(SnapshotKind::Plo, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|r| r.refresh_id == "r2"));
        assert_eq!(repo.count(SnapshotKind::Po).unwrap(), 0);
    }

    #[test]
    fn test_rolled_back_replace_keeps_previous_generation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let repo = SnapshotRepository::new(conn.clone());

        {
            let mut c = conn.lock().unwrap();
            let tx = c.transaction().unwrap();
            replace_snapshot(&tx, SnapshotKind::Po, &[row(1, "CS101", 1, "r1")]).unwrap();
            tx.commit().unwrap();
        }
        {
            let mut c = conn.lock().unwrap();
            let tx = c.transaction().unwrap();
            replace_snapshot(&tx, SnapshotKind::Po, &[]).unwrap();
            // tx 未提交即被丢弃 → 回滚
        }
        assert_eq!(repo.count(SnapshotKind::Po).unwrap(), 1);
    }
}
