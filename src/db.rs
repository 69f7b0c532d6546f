// ==========================================
// 学习成果达成度引擎 - SQLite 连接与 schema
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键、busy_timeout)
// - 提供引擎读取 / 写入的表结构 (幂等, CREATE TABLE IF NOT EXISTS)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout (毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// foreign_keys 与 busy_timeout 都需要每个连接单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version (若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表 (幂等)
///
/// 课程体系表通常由外部系统维护,这里只声明引擎需要的列;
/// 快照表、刷新日志、配置表由本 crate 拥有。
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    if let Some(version) = read_schema_version(conn)? {
        if version > CURRENT_SCHEMA_VERSION {
            tracing::warn!(
                db_version = version,
                expected = CURRENT_SCHEMA_VERSION,
                "数据库 schema 版本高于当前代码,继续运行但可能缺少兼容性"
            );
        }
    }

    conn.execute_batch(SCHEMA_DDL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ===== 配置 =====
CREATE TABLE IF NOT EXISTS config_scope (
  scope_id TEXT PRIMARY KEY,
  scope_type TEXT NOT NULL,
  scope_key TEXT NOT NULL,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  UNIQUE(scope_type, scope_key)
);

INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
VALUES ('global', 'GLOBAL', 'global');

CREATE TABLE IF NOT EXISTS config_kv (
  scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (scope_id, key)
);

-- ===== 课程体系 (只读) =====
CREATE TABLE IF NOT EXISTS programme (
  programme_id INTEGER PRIMARY KEY,
  code TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS course (
  course_id INTEGER PRIMARY KEY,
  programme_id INTEGER NOT NULL REFERENCES programme(programme_id) ON DELETE CASCADE,
  code TEXT NOT NULL,
  name TEXT NOT NULL,
  year INTEGER NOT NULL,
  semester INTEGER NOT NULL,
  expected_passing_clo_percentage REAL NOT NULL DEFAULT 50,
  grade_a REAL NOT NULL DEFAULT 80,
  grade_bp REAL NOT NULL DEFAULT 75,
  grade_b REAL NOT NULL DEFAULT 70,
  grade_cp REAL NOT NULL DEFAULT 65,
  grade_c REAL NOT NULL DEFAULT 60,
  grade_dp REAL NOT NULL DEFAULT 55,
  grade_d REAL NOT NULL DEFAULT 50,
  grade_f REAL NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_course_programme_year
  ON course(programme_id, year, semester);

CREATE TABLE IF NOT EXISTS student (
  student_id INTEGER PRIMARY KEY,
  code TEXT NOT NULL UNIQUE,
  name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS enrollment (
  course_id INTEGER NOT NULL REFERENCES course(course_id) ON DELETE CASCADE,
  student_id INTEGER NOT NULL REFERENCES student(student_id) ON DELETE CASCADE,
  status TEXT NOT NULL DEFAULT 'ENROLL' CHECK (status IN ('ENROLL', 'WITHDRAW')),
  PRIMARY KEY (course_id, student_id)
);
CREATE INDEX IF NOT EXISTS idx_enrollment_student ON enrollment(student_id);

CREATE TABLE IF NOT EXISTS assignment_group (
  group_id INTEGER PRIMARY KEY,
  course_id INTEGER NOT NULL REFERENCES course(course_id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  weight REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS assignment (
  assignment_id INTEGER PRIMARY KEY,
  group_id INTEGER NOT NULL REFERENCES assignment_group(group_id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  max_score REAL NOT NULL,
  expected_score_percentage REAL NOT NULL DEFAULT 50,
  is_included_in_clo INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS clo (
  clo_id INTEGER PRIMARY KEY,
  course_id INTEGER NOT NULL REFERENCES course(course_id) ON DELETE CASCADE,
  code TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT '',
  expected_passing_assignment_percentage REAL NOT NULL DEFAULT 50
);

CREATE TABLE IF NOT EXISTS assignment_clo (
  assignment_id INTEGER NOT NULL REFERENCES assignment(assignment_id) ON DELETE CASCADE,
  clo_id INTEGER NOT NULL REFERENCES clo(clo_id) ON DELETE CASCADE,
  PRIMARY KEY (assignment_id, clo_id)
);

CREATE TABLE IF NOT EXISTS po (
  po_id INTEGER PRIMARY KEY,
  programme_id INTEGER NOT NULL REFERENCES programme(programme_id) ON DELETE CASCADE,
  code TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS clo_po (
  clo_id INTEGER NOT NULL REFERENCES clo(clo_id) ON DELETE CASCADE,
  po_id INTEGER NOT NULL REFERENCES po(po_id) ON DELETE CASCADE,
  PRIMARY KEY (clo_id, po_id)
);

CREATE TABLE IF NOT EXISTS plo (
  plo_id INTEGER PRIMARY KEY,
  programme_id INTEGER NOT NULL REFERENCES programme(programme_id) ON DELETE CASCADE,
  code TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS sub_plo (
  sub_plo_id INTEGER PRIMARY KEY,
  plo_id INTEGER NOT NULL REFERENCES plo(plo_id) ON DELETE CASCADE,
  code TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS clo_sub_plo (
  clo_id INTEGER NOT NULL REFERENCES clo(clo_id) ON DELETE CASCADE,
  sub_plo_id INTEGER NOT NULL REFERENCES sub_plo(sub_plo_id) ON DELETE CASCADE,
  PRIMARY KEY (clo_id, sub_plo_id)
);

CREATE TABLE IF NOT EXISTS so (
  so_id INTEGER PRIMARY KEY,
  programme_id INTEGER NOT NULL REFERENCES programme(programme_id) ON DELETE CASCADE,
  code TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS sub_so (
  sub_so_id INTEGER PRIMARY KEY,
  so_id INTEGER NOT NULL REFERENCES so(so_id) ON DELETE CASCADE,
  code TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS clo_sub_so (
  clo_id INTEGER NOT NULL REFERENCES clo(clo_id) ON DELETE CASCADE,
  sub_so_id INTEGER NOT NULL REFERENCES sub_so(sub_so_id) ON DELETE CASCADE,
  PRIMARY KEY (clo_id, sub_so_id)
);

CREATE TABLE IF NOT EXISTS score (
  student_id INTEGER NOT NULL REFERENCES student(student_id) ON DELETE CASCADE,
  assignment_id INTEGER NOT NULL REFERENCES assignment(assignment_id) ON DELETE CASCADE,
  score REAL NOT NULL,
  PRIMARY KEY (student_id, assignment_id)
);

-- ===== 达成度快照 (整表替换) =====
CREATE TABLE IF NOT EXISTS plo_course_snapshot (
  course_id INTEGER NOT NULL,
  programme_id INTEGER NOT NULL,
  course_code TEXT NOT NULL,
  course_name TEXT NOT NULL,
  year INTEGER NOT NULL,
  semester INTEGER NOT NULL,
  outcome_id INTEGER NOT NULL,
  outcome_code TEXT NOT NULL,
  pass_count INTEGER NOT NULL,
  fail_count INTEGER NOT NULL,
  not_applicable_count INTEGER NOT NULL,
  passing_percentage REAL,
  refresh_id TEXT NOT NULL,
  refreshed_at TEXT NOT NULL,
  PRIMARY KEY (course_id, outcome_id)
);
CREATE INDEX IF NOT EXISTS idx_plo_snapshot_programme
  ON plo_course_snapshot(programme_id, course_code, year, semester);

CREATE TABLE IF NOT EXISTS po_course_snapshot (
  course_id INTEGER NOT NULL,
  programme_id INTEGER NOT NULL,
  course_code TEXT NOT NULL,
  course_name TEXT NOT NULL,
  year INTEGER NOT NULL,
  semester INTEGER NOT NULL,
  outcome_id INTEGER NOT NULL,
  outcome_code TEXT NOT NULL,
  pass_count INTEGER NOT NULL,
  fail_count INTEGER NOT NULL,
  not_applicable_count INTEGER NOT NULL,
  passing_percentage REAL,
  refresh_id TEXT NOT NULL,
  refreshed_at TEXT NOT NULL,
  PRIMARY KEY (course_id, outcome_id)
);
CREATE INDEX IF NOT EXISTS idx_po_snapshot_programme
  ON po_course_snapshot(programme_id, course_code, year, semester);

CREATE TABLE IF NOT EXISTS outcome_cache_refresh_log (
  refresh_id TEXT PRIMARY KEY,
  snapshot TEXT NOT NULL,
  trigger_summary TEXT NOT NULL,
  trigger_source TEXT,
  rows_affected INTEGER NOT NULL DEFAULT 0,
  started_at TEXT NOT NULL DEFAULT (datetime('now')),
  completed_at TEXT,
  duration_ms INTEGER,
  status TEXT NOT NULL DEFAULT 'RUNNING',
  error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_cache_refresh_log_snapshot
  ON outcome_cache_refresh_log(snapshot, started_at DESC);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('plo_course_snapshot', 'po_course_snapshot', 'outcome_cache_refresh_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_schema_version_absent_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
