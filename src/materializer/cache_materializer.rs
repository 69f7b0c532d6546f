// ==========================================
// 学习成果达成度引擎 - 缓存物化器
// ==========================================
// 职责: 组装 PLO / PO 两个快照 worker,对外提供刷新、状态与事件发布入口
// ==========================================

use crate::domain::types::SnapshotKind;
use crate::engine::events::OutcomeEventPublisher;
use crate::materializer::error::{MaterializerError, MaterializerResult};
use crate::materializer::event_adapter::CacheInvalidationAdapter;
use crate::materializer::refresh_service::{
    BlockingSnapshotRecomputer, OutcomeCacheRefreshService, SnapshotRecomputer,
};
use crate::materializer::refresh_worker::{SnapshotRefreshWorker, WorkerStatus};
use futures::future::join_all;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 手动刷新范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheRefreshScope {
    Plo,
    Po,
    All,
}

impl CacheRefreshScope {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PLO" => Some(Self::Plo),
            "PO" => Some(Self::Po),
            "ALL" => Some(Self::All),
            _ => None,
        }
    }

    pub fn snapshots(&self) -> Vec<SnapshotKind> {
        match self {
            Self::Plo => vec![SnapshotKind::Plo],
            Self::Po => vec![SnapshotKind::Po],
            Self::All => SnapshotKind::ALL.to_vec(),
        }
    }
}

/// 缓存物化器
pub struct OutcomeCacheMaterializer {
    plo: SnapshotRefreshWorker,
    po: SnapshotRefreshWorker,
}

impl OutcomeCacheMaterializer {
    /// 在当前 tokio 运行时上启动两个快照 worker
    pub fn spawn(conn: Arc<Mutex<Connection>>, debounce: Duration) -> Self {
        let service = Arc::new(OutcomeCacheRefreshService::new(conn));
        let recomputer: Arc<dyn SnapshotRecomputer> = Arc::new(BlockingSnapshotRecomputer::new(service));
        Self::with_recomputer(recomputer, debounce)
    }

    pub fn with_recomputer(recomputer: Arc<dyn SnapshotRecomputer>, debounce: Duration) -> Self {
        tracing::info!(debounce_ms = debounce.as_millis() as u64, "达成度缓存物化器启动");
        Self {
            plo: SnapshotRefreshWorker::spawn(SnapshotKind::Plo, recomputer.clone(), debounce),
            po: SnapshotRefreshWorker::spawn(SnapshotKind::Po, recomputer, debounce),
        }
    }

    pub fn worker(&self, kind: SnapshotKind) -> &SnapshotRefreshWorker {
        match kind {
            SnapshotKind::Plo => &self.plo,
            SnapshotKind::Po => &self.po,
        }
    }

    /// 写路径使用的事件发布器
    pub fn publisher(&self) -> Arc<dyn OutcomeEventPublisher> {
        Arc::new(CacheInvalidationAdapter::new(vec![self.plo.clone(), self.po.clone()]))
    }

    /// 手动刷新并等待完成
    ///
    /// 范围内各快照并行等待;任一失败时返回第一个错误,
    /// 其余快照的刷新照常完成。
    pub async fn refresh(&self, scope: CacheRefreshScope, source: Option<&str>) -> MaterializerResult<Vec<WorkerStatus>> {
        let workers: Vec<&SnapshotRefreshWorker> = scope.snapshots().into_iter().map(|k| self.worker(k)).collect();
        let results = join_all(workers.iter().map(|w| w.refresh_now(source))).await;

        let mut statuses = Vec::with_capacity(results.len());
        let mut first_error: Option<MaterializerError> = None;
        for result in results {
            match result {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(statuses),
        }
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        vec![self.plo.status(), self.po.status()]
    }

    pub async fn shutdown(&self) {
        self.plo.shutdown().await;
        self.po.shutdown().await;
        tracing::info!("达成度缓存物化器已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{OutcomeEvent, OutcomeEventType};
    use crate::materializer::refresh_service::{RefreshReport, TriggerBatch};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TallyRecomputer {
        plo_runs: AtomicUsize,
        po_runs: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotRecomputer for TallyRecomputer {
        async fn recompute(&self, kind: SnapshotKind, _batch: TriggerBatch) -> MaterializerResult<RefreshReport> {
            match kind {
                SnapshotKind::Plo => self.plo_runs.fetch_add(1, Ordering::SeqCst),
                SnapshotKind::Po => self.po_runs.fetch_add(1, Ordering::SeqCst),
            };
            Ok(RefreshReport {
                refresh_id: format!("{}-run", kind.as_str()),
                snapshot: kind,
                rows_affected: 0,
                duration_ms: 0,
            })
        }
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!(CacheRefreshScope::from_str("plo"), Some(CacheRefreshScope::Plo));
        assert_eq!(CacheRefreshScope::from_str(" All "), Some(CacheRefreshScope::All));
        assert_eq!(CacheRefreshScope::from_str("so"), None);
        assert_eq!(CacheRefreshScope::All.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_scope_only_touches_selected_snapshots() {
        let recomputer = Arc::new(TallyRecomputer {
            plo_runs: AtomicUsize::new(0),
            po_runs: AtomicUsize::new(0),
        });
        let materializer = OutcomeCacheMaterializer::with_recomputer(recomputer.clone(), Duration::ZERO);

        let statuses = materializer.refresh(CacheRefreshScope::Po, None).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].snapshot, SnapshotKind::Po);
        assert_eq!(recomputer.plo_runs.load(Ordering::SeqCst), 0);

        let statuses = materializer.refresh(CacheRefreshScope::All, Some("cli")).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(recomputer.plo_runs.load(Ordering::SeqCst), 1);
        assert_eq!(recomputer.po_runs.load(Ordering::SeqCst), 2);

        materializer.shutdown().await;
    }

    #[tokio::test]
    async fn test_publisher_marks_workers_dirty() {
        let recomputer = Arc::new(TallyRecomputer {
            plo_runs: AtomicUsize::new(0),
            po_runs: AtomicUsize::new(0),
        });
        let materializer = OutcomeCacheMaterializer::with_recomputer(recomputer, Duration::from_secs(60));

        materializer
            .publisher()
            .publish(OutcomeEvent::new(OutcomeEventType::PoChanged, Some("test".to_string())))
            .unwrap();

        let status = materializer.status();
        assert_eq!(status[0].requested_seq, 0);
        assert_eq!(status[1].requested_seq, 1);

        materializer.shutdown().await;
    }
}
