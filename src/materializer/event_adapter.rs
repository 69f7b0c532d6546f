// ==========================================
// 学习成果达成度引擎 - 缓存失效适配器
// ==========================================
// 职责: 实现 Engine 层定义的 OutcomeEventPublisher trait
// 说明: 把课程体系变更事件路由到受影响快照的 worker,只做标记
// ==========================================

use crate::engine::events::{OutcomeEvent, OutcomeEventPublisher};
use crate::materializer::refresh_service::should_refresh;
use crate::materializer::refresh_worker::SnapshotRefreshWorker;
use std::error::Error;

/// 缓存失效适配器
pub struct CacheInvalidationAdapter {
    workers: Vec<SnapshotRefreshWorker>,
}

impl CacheInvalidationAdapter {
    pub fn new(workers: Vec<SnapshotRefreshWorker>) -> Self {
        Self { workers }
    }
}

impl OutcomeEventPublisher for CacheInvalidationAdapter {
    fn publish(&self, event: OutcomeEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut marked = Vec::new();
        for worker in &self.workers {
            if should_refresh(worker.snapshot(), &event.event_type) {
                worker.mark_dirty(event.event_type.as_str(), event.source.as_deref());
                marked.push(worker.snapshot().as_str());
            }
        }

        if marked.is_empty() {
            tracing::debug!(
                "CacheInvalidationAdapter: 事件不影响任何快照 - event_type={}",
                event.event_type.as_str()
            );
        } else {
            tracing::debug!(
                "CacheInvalidationAdapter: 已标记快照 - event_type={}, course_id={:?}, snapshots={:?}",
                event.event_type.as_str(),
                event.course_id,
                marked
            );
        }

        Ok(marked.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SnapshotKind;
    use crate::engine::events::OutcomeEventType;
    use crate::materializer::error::MaterializerResult;
    use crate::materializer::refresh_service::{RefreshReport, SnapshotRecomputer, TriggerBatch};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoopRecomputer;

    #[async_trait]
    impl SnapshotRecomputer for NoopRecomputer {
        async fn recompute(&self, kind: SnapshotKind, _batch: TriggerBatch) -> MaterializerResult<RefreshReport> {
            Ok(RefreshReport {
                refresh_id: "noop".to_string(),
                snapshot: kind,
                rows_affected: 0,
                duration_ms: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_routes_events_to_affected_snapshots() {
        let recomputer: Arc<dyn SnapshotRecomputer> = Arc::new(NoopRecomputer);
        // 较长的 debounce 让状态停留在 Dirty,便于断言
        let plo = SnapshotRefreshWorker::spawn(SnapshotKind::Plo, recomputer.clone(), Duration::from_secs(60));
        let po = SnapshotRefreshWorker::spawn(SnapshotKind::Po, recomputer, Duration::from_secs(60));
        let adapter = CacheInvalidationAdapter::new(vec![plo.clone(), po.clone()]);

        let marked = adapter
            .publish(OutcomeEvent::new(OutcomeEventType::CloSubPloLinkChanged, None))
            .unwrap();
        assert_eq!(marked, "PLO");
        assert_eq!(plo.status().requested_seq, 1);
        assert_eq!(po.status().requested_seq, 0);

        let marked = adapter
            .publish(OutcomeEvent::new(OutcomeEventType::EnrollmentChanged, None).for_course(1))
            .unwrap();
        assert_eq!(marked, "PLO,PO");
        assert_eq!(po.status().requested_seq, 1);

        plo.shutdown().await;
        po.shutdown().await;
    }
}
