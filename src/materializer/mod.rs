// ==========================================
// 学习成果达成度引擎 - 缓存物化层
// ==========================================
// 职责: 维护 PLO / PO 课程达成度快照表
// 机制: 写操作发布事件 → 标记脏 → 后台 worker 合并重算
// ==========================================

pub mod cache_materializer;
pub mod error;
pub mod event_adapter;
pub mod refresh_service;
pub mod refresh_worker;

pub use cache_materializer::{CacheRefreshScope, OutcomeCacheMaterializer};
pub use error::{MaterializerError, MaterializerResult};
pub use event_adapter::CacheInvalidationAdapter;
pub use refresh_service::{
    should_refresh, should_refresh_plo, should_refresh_po, BlockingSnapshotRecomputer,
    OutcomeCacheRefreshService, RefreshReport, SnapshotRecomputer, TriggerBatch,
};
pub use refresh_worker::{CachePhase, SnapshotRefreshWorker, WorkerStatus};
