// ==========================================
// 学习成果达成度引擎 - 快照刷新服务
// ==========================================
// 职责: 重新计算 plo_course_snapshot / po_course_snapshot
// 流程: 加载全部课程 → 构图 → 判定 → 汇总 → 单事务整表替换 + 刷新日志
// 失败: 事务回滚,旧一代数据保持可读;FAILED 记录单独写入
// ==========================================

use crate::domain::dataset::AttainmentScope;
use crate::domain::types::SnapshotKind;
use crate::engine::context::EvalContext;
use crate::engine::events::OutcomeEventType;
use crate::engine::outcome_graph::OutcomeGraphBuilder;
use crate::engine::population_aggregator::PopulationAggregator;
use crate::engine::threshold_evaluator::ThresholdEvaluator;
use crate::materializer::error::{MaterializerError, MaterializerResult};
use crate::repository::attainment_repo::AttainmentRepository;
use crate::repository::cache_refresh_repo::{log_refresh_complete, log_refresh_failed, log_refresh_start};
use crate::repository::error::RepositoryError;
use crate::repository::snapshot_repo::{replace_snapshot, OutcomeSnapshotRow};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// 一轮重算所合并的触发信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBatch {
    /// 例如 "ScoreChanged x3, CloChanged x1"
    pub summary: String,
    /// 触发源 (去重后逗号拼接)
    pub source: Option<String>,
}

impl TriggerBatch {
    pub fn manual(source: Option<String>) -> Self {
        Self {
            summary: OutcomeEventType::ManualRefresh.as_str().to_string(),
            source,
        }
    }
}

/// 单轮重算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub refresh_id: String,
    pub snapshot: SnapshotKind,
    pub rows_affected: usize,
    pub duration_ms: i64,
}

/// 快照重算接口 (worker 通过它驱动实际计算,测试中可替换)
#[async_trait]
pub trait SnapshotRecomputer: Send + Sync {
    async fn recompute(&self, kind: SnapshotKind, batch: TriggerBatch) -> MaterializerResult<RefreshReport>;
}

/// 判断 PLO 快照是否受影响
pub fn should_refresh_plo(event_type: &OutcomeEventType) -> bool {
    matches!(
        event_type,
        OutcomeEventType::CloChanged
            | OutcomeEventType::CloSubPloLinkChanged
            | OutcomeEventType::PloChanged
            | OutcomeEventType::SubPloChanged
            | OutcomeEventType::EnrollmentChanged
            | OutcomeEventType::ScoreChanged
            | OutcomeEventType::AssignmentCloLinkChanged
            | OutcomeEventType::CourseChanged
            | OutcomeEventType::SoChanged
            | OutcomeEventType::SubSoChanged
            | OutcomeEventType::CloSubSoLinkChanged
            | OutcomeEventType::ManualRefresh
    )
}

/// 判断 PO 快照是否受影响
pub fn should_refresh_po(event_type: &OutcomeEventType) -> bool {
    matches!(
        event_type,
        OutcomeEventType::CloChanged
            | OutcomeEventType::CloPoLinkChanged
            | OutcomeEventType::PoChanged
            | OutcomeEventType::EnrollmentChanged
            | OutcomeEventType::ScoreChanged
            | OutcomeEventType::AssignmentCloLinkChanged
            | OutcomeEventType::CourseChanged
            | OutcomeEventType::SoChanged
            | OutcomeEventType::SubSoChanged
            | OutcomeEventType::CloSubSoLinkChanged
            | OutcomeEventType::ManualRefresh
    )
}

pub fn should_refresh(kind: SnapshotKind, event_type: &OutcomeEventType) -> bool {
    match kind {
        SnapshotKind::Plo => should_refresh_plo(event_type),
        SnapshotKind::Po => should_refresh_po(event_type),
    }
}

// ==========================================
// OutcomeCacheRefreshService
// ==========================================
pub struct OutcomeCacheRefreshService {
    conn: Arc<Mutex<Connection>>,
    attainment_repo: AttainmentRepository,
}

impl OutcomeCacheRefreshService {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            attainment_repo: AttainmentRepository::new(conn.clone()),
            conn,
        }
    }

    /// 计算新一代快照行 (不写库)
    pub fn compute_rows(
        &self,
        kind: SnapshotKind,
        refresh_id: &str,
        refreshed_at: &str,
    ) -> MaterializerResult<Vec<OutcomeSnapshotRow>> {
        let dataset = self.attainment_repo.load_dataset(&AttainmentScope::AllCourses)?;
        let graphs = OutcomeGraphBuilder::new().build(&dataset);
        let matrices = ThresholdEvaluator::new().evaluate_all(&graphs, &EvalContext::background())?;
        let aggregator = PopulationAggregator::new();
        let outcome_kind = kind.outcome_kind();

        let mut rows = Vec::new();
        for (graph, matrix) in graphs.iter().zip(matrices.iter()) {
            for node_id in graph.nodes_of_kind(outcome_kind) {
                let attainment = aggregator.aggregate_node(graph, matrix, node_id);
                rows.push(OutcomeSnapshotRow {
                    course_id: graph.course.course_id,
                    programme_id: graph.course.programme_id,
                    course_code: graph.course.code.clone(),
                    course_name: graph.course.name.clone(),
                    year: graph.course.year,
                    semester: graph.course.semester,
                    outcome_id: attainment.outcome_id,
                    outcome_code: attainment.code,
                    pass_count: attainment.pass_count as i64,
                    fail_count: attainment.fail_count as i64,
                    not_applicable_count: attainment.not_applicable_count as i64,
                    passing_percentage: attainment.passing_percentage,
                    refresh_id: refresh_id.to_string(),
                    refreshed_at: refreshed_at.to_string(),
                });
            }
        }
        Ok(rows)
    }

    /// 重算并整表替换一个快照
    ///
    /// # 返回
    /// - Ok(report): 新一代数据已提交
    /// - Err: 已回滚,失败已写入刷新日志并输出 error 日志
    pub fn refresh_snapshot(&self, kind: SnapshotKind, batch: &TriggerBatch) -> MaterializerResult<RefreshReport> {
        let refresh_id = Uuid::new_v4().to_string();
        let started_at = Utc::now().to_rfc3339();
        let timer = Instant::now();

        tracing::info!(
            refresh_id = %refresh_id,
            snapshot = kind.as_str(),
            triggers = %batch.summary,
            "达成度快照刷新开始"
        );

        match self.replace_generation(kind, batch, &refresh_id, &started_at, &timer) {
            Ok(rows_affected) => {
                let duration_ms = timer.elapsed().as_millis() as i64;
                tracing::info!(
                    refresh_id = %refresh_id,
                    snapshot = kind.as_str(),
                    rows = rows_affected,
                    duration_ms,
                    "达成度快照刷新完成"
                );
                Ok(RefreshReport {
                    refresh_id,
                    snapshot: kind,
                    rows_affected,
                    duration_ms,
                })
            }
            Err(e) => {
                let duration_ms = timer.elapsed().as_millis() as i64;
                let message = e.to_string();
                tracing::error!(
                    refresh_id = %refresh_id,
                    snapshot = kind.as_str(),
                    error = %message,
                    "达成度快照刷新失败,保留上一代数据"
                );
                self.record_failure(kind, batch, &refresh_id, &started_at, duration_ms, &message);
                Err(e)
            }
        }
    }

    fn replace_generation(
        &self,
        kind: SnapshotKind,
        batch: &TriggerBatch,
        refresh_id: &str,
        started_at: &str,
        timer: &Instant,
    ) -> MaterializerResult<usize> {
        let rows = self.compute_rows(kind, refresh_id, started_at)?;

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        log_refresh_start(&tx, refresh_id, kind, &batch.summary, batch.source.as_deref(), started_at)?;
        let rows_affected = replace_snapshot(&tx, kind, &rows)?;
        let completed_at = Utc::now().to_rfc3339();
        let duration_ms = timer.elapsed().as_millis() as i64;
        log_refresh_complete(&tx, refresh_id, rows_affected, &completed_at, duration_ms)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(rows_affected)
    }

    fn record_failure(
        &self,
        kind: SnapshotKind,
        batch: &TriggerBatch,
        refresh_id: &str,
        started_at: &str,
        duration_ms: i64,
        message: &str,
    ) {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("刷新失败记录写入跳过,锁获取失败: {}", e);
                return;
            }
        };
        let completed_at = Utc::now().to_rfc3339();
        if let Err(e) = log_refresh_failed(
            &conn,
            refresh_id,
            kind,
            &batch.summary,
            batch.source.as_deref(),
            started_at,
            &completed_at,
            duration_ms,
            message,
        ) {
            tracing::error!(refresh_id = %refresh_id, "刷新失败记录写入失败: {}", e);
        }
    }
}

/// 在 tokio 阻塞线程池上运行同步的刷新服务
pub struct BlockingSnapshotRecomputer {
    service: Arc<OutcomeCacheRefreshService>,
}

impl BlockingSnapshotRecomputer {
    pub fn new(service: Arc<OutcomeCacheRefreshService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl SnapshotRecomputer for BlockingSnapshotRecomputer {
    async fn recompute(&self, kind: SnapshotKind, batch: TriggerBatch) -> MaterializerResult<RefreshReport> {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || service.refresh_snapshot(kind, &batch))
            .await
            .map_err(|e| MaterializerError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};
    use crate::repository::cache_refresh_repo::{CacheRefreshRepository, STATUS_FAILED, STATUS_SUCCESS};
    use crate::repository::snapshot_repo::SnapshotRepository;

    fn seeded_conn() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO programme (programme_id, code, name) VALUES (1, 'CS', 'Computer Science');
            INSERT INTO course (course_id, programme_id, code, name, year, semester, expected_passing_clo_percentage)
              VALUES (10, 1, 'CS101', 'Intro', 2024, 1, 50);
            INSERT INTO student (student_id, code) VALUES (1, 'S1'), (2, 'S2');
            INSERT INTO enrollment (course_id, student_id, status) VALUES (10, 1, 'ENROLL'), (10, 2, 'ENROLL');
            INSERT INTO assignment_group (group_id, course_id, name, weight) VALUES (100, 10, 'HW', 100);
            INSERT INTO assignment (assignment_id, group_id, name, max_score, expected_score_percentage)
              VALUES (1000, 100, 'HW1', 10, 60);
            INSERT INTO clo (clo_id, course_id, code, expected_passing_assignment_percentage)
              VALUES (500, 10, 'CLO1', 50);
            INSERT INTO assignment_clo (assignment_id, clo_id) VALUES (1000, 500);
            INSERT INTO plo (plo_id, programme_id, code) VALUES (7, 1, 'PLO1');
            INSERT INTO sub_plo (sub_plo_id, plo_id, code) VALUES (71, 7, 'PLO1.1'), (72, 7, 'PLO1.2');
            INSERT INTO clo_sub_plo (clo_id, sub_plo_id) VALUES (500, 71), (500, 72);
            INSERT INTO po (po_id, programme_id, code) VALUES (3, 1, 'PO3');
            INSERT INTO clo_po (clo_id, po_id) VALUES (500, 3);
            INSERT INTO score (student_id, assignment_id, score) VALUES (1, 1000, 8), (2, 1000, 2);
            "#,
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_trigger_routing() {
        assert!(should_refresh_plo(&OutcomeEventType::CloSubPloLinkChanged));
        assert!(!should_refresh_po(&OutcomeEventType::CloSubPloLinkChanged));
        assert!(should_refresh_po(&OutcomeEventType::CloPoLinkChanged));
        assert!(!should_refresh_plo(&OutcomeEventType::PoChanged));
        for shared in [
            OutcomeEventType::EnrollmentChanged,
            OutcomeEventType::ScoreChanged,
            OutcomeEventType::SubSoChanged,
            OutcomeEventType::ManualRefresh,
        ] {
            assert!(should_refresh(SnapshotKind::Plo, &shared));
            assert!(should_refresh(SnapshotKind::Po, &shared));
        }
    }

    #[test]
    fn test_refresh_snapshot_writes_rows_and_log() {
        let conn = seeded_conn();
        let service = OutcomeCacheRefreshService::new(conn.clone());

        let report = service
            .refresh_snapshot(SnapshotKind::Plo, &TriggerBatch::manual(Some("test".to_string())))
            .unwrap();
        assert_eq!(report.rows_affected, 1);

        let rows = SnapshotRepository::new(conn.clone())
            .list_by_programme(SnapshotKind::Plo, 1)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome_code, "PLO1");
        assert_eq!(rows[0].pass_count, 1);
        assert_eq!(rows[0].fail_count, 1);
        assert_eq!(rows[0].passing_percentage, Some(50.0));

        let log = CacheRefreshRepository::new(conn)
            .find_log_by_id(&report.refresh_id)
            .unwrap()
            .unwrap();
        assert_eq!(log.status, STATUS_SUCCESS);
        assert_eq!(log.rows_affected, 1);
        assert_eq!(log.trigger_source.as_deref(), Some("test"));
    }

    #[test]
    fn test_failed_refresh_keeps_previous_generation() {
        let conn = seeded_conn();
        let service = OutcomeCacheRefreshService::new(conn.clone());
        service.refresh_snapshot(SnapshotKind::Po, &TriggerBatch::default()).unwrap();

        // 破坏快照表结构,使 INSERT 失败
        conn.lock()
            .unwrap()
            .execute_batch(
                r#"
                ALTER TABLE po_course_snapshot RENAME TO po_course_snapshot_old;
                CREATE TABLE po_course_snapshot (course_id INTEGER NOT NULL);
                "#,
            )
            .unwrap();

        let result = service.refresh_snapshot(SnapshotKind::Po, &TriggerBatch::default());
        assert!(result.is_err());

        let repo = CacheRefreshRepository::new(conn.clone());
        assert_eq!(repo.count_by_status(SnapshotKind::Po, STATUS_FAILED).unwrap(), 1);
        let latest = repo.find_latest_log(SnapshotKind::Po).unwrap().unwrap();
        assert_eq!(latest.status, STATUS_FAILED);
        assert!(latest.error_message.is_some());

        let old_rows: i64 = conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM po_course_snapshot_old", [], |row| row.get(0))
            .unwrap();
        assert_eq!(old_rows, 1);
    }
}
