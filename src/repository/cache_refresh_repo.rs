// ==========================================
// 学习成果达成度引擎 - 缓存刷新日志仓储
// ==========================================
// 职责: outcome_cache_refresh_log 的写入 (RUNNING/SUCCESS/FAILED) 与查询
// 说明: 开始/完成记录与快照替换同事务;失败记录在回滚后单独写入
// ==========================================

use crate::domain::types::SnapshotKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const STATUS_RUNNING: &str = "RUNNING";
pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRefreshLogEntity {
    pub refresh_id: String,
    pub snapshot: String,
    pub trigger_summary: String,
    pub trigger_source: Option<String>,
    pub rows_affected: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
}

pub struct CacheRefreshRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CacheRefreshRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_latest_log(&self, kind: SnapshotKind) -> RepositoryResult<Option<CacheRefreshLogEntity>> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT refresh_id, snapshot, trigger_summary, trigger_source, rows_affected,
                   started_at, completed_at, duration_ms, status, error_message
            FROM outcome_cache_refresh_log
            WHERE snapshot = ?1
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            "#,
            params![kind.as_str()],
            map_log_row,
        )
        .optional()
        .map_err(|e| e.into())
    }

    pub fn find_log_by_id(&self, refresh_id: &str) -> RepositoryResult<Option<CacheRefreshLogEntity>> {
        let conn = self.get_conn()?;
        conn.query_row(
            r#"
            SELECT refresh_id, snapshot, trigger_summary, trigger_source, rows_affected,
                   started_at, completed_at, duration_ms, status, error_message
            FROM outcome_cache_refresh_log
            WHERE refresh_id = ?1
            "#,
            params![refresh_id],
            map_log_row,
        )
        .optional()
        .map_err(|e| e.into())
    }

    /// 按状态统计某快照的刷新次数
    pub fn count_by_status(&self, kind: SnapshotKind, status: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM outcome_cache_refresh_log WHERE snapshot = ?1 AND status = ?2",
            params![kind.as_str(), status],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// 记录刷新开始 (与快照替换同事务)
pub fn log_refresh_start(
    tx: &Transaction,
    refresh_id: &str,
    kind: SnapshotKind,
    trigger_summary: &str,
    trigger_source: Option<&str>,
    started_at: &str,
) -> RepositoryResult<()> {
    tx.execute(
        r#"
        INSERT INTO outcome_cache_refresh_log (
            refresh_id, snapshot, trigger_summary, trigger_source,
            rows_affected, started_at, status
        ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
        "#,
        params![
            refresh_id,
            kind.as_str(),
            trigger_summary,
            trigger_source,
            started_at,
            STATUS_RUNNING
        ],
    )?;
    Ok(())
}

/// 记录刷新完成
pub fn log_refresh_complete(
    tx: &Transaction,
    refresh_id: &str,
    rows_affected: usize,
    completed_at: &str,
    duration_ms: i64,
) -> RepositoryResult<()> {
    tx.execute(
        r#"
        UPDATE outcome_cache_refresh_log
        SET rows_affected = ?2,
            completed_at = ?3,
            duration_ms = ?4,
            status = ?5
        WHERE refresh_id = ?1
        "#,
        params![refresh_id, rows_affected as i64, completed_at, duration_ms, STATUS_SUCCESS],
    )?;
    Ok(())
}

/// 记录刷新失败
///
/// 刷新事务已回滚,RUNNING 记录随之消失,这里直接写入完整的 FAILED 记录。
#[allow(clippy::too_many_arguments)]
pub fn log_refresh_failed(
    conn: &Connection,
    refresh_id: &str,
    kind: SnapshotKind,
    trigger_summary: &str,
    trigger_source: Option<&str>,
    started_at: &str,
    completed_at: &str,
    duration_ms: i64,
    error_message: &str,
) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO outcome_cache_refresh_log (
            refresh_id, snapshot, trigger_summary, trigger_source, rows_affected,
            started_at, completed_at, duration_ms, status, error_message
        ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            refresh_id,
            kind.as_str(),
            trigger_summary,
            trigger_source,
            started_at,
            completed_at,
            duration_ms,
            STATUS_FAILED,
            error_message
        ],
    )?;
    Ok(())
}

fn map_log_row(row: &Row) -> rusqlite::Result<CacheRefreshLogEntity> {
    Ok(CacheRefreshLogEntity {
        refresh_id: row.get(0)?,
        snapshot: row.get(1)?,
        trigger_summary: row.get(2)?,
        trigger_source: row.get(3)?,
        rows_affected: row.get(4)?,
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
        duration_ms: row.get(7)?,
        status: row.get(8)?,
        error_message: row.get(9)?,
    })
}
