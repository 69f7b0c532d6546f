// ==========================================
// 学习成果达成度引擎 - 快照刷新 worker
// ==========================================
// 职责: 每个快照一个后台 tokio 任务,串行执行重算
// 机制:
// - 写操作只调用 mark_dirty: 记录触发、序号 +1、唤醒 worker
// - worker 一次取走全部待处理触发,合并为一轮重算 (single-flight)
// - 重算期间的新触发留到下一轮,不会并发重建同一张表
// - refresh_now 等待覆盖自身序号的那一轮完成
// ==========================================

use crate::domain::types::SnapshotKind;
use crate::engine::events::OutcomeEventType;
use crate::materializer::error::{MaterializerError, MaterializerResult};
use crate::materializer::refresh_service::{SnapshotRecomputer, TriggerBatch};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// 快照生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePhase {
    /// 已与最近一次触发对齐
    Fresh,
    /// 有未处理的触发
    Dirty,
    Recomputing,
    Stopped,
}

/// worker 对外可见的状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub snapshot: SnapshotKind,
    pub phase: CachePhase,
    /// 已登记的触发序号
    pub requested_seq: u64,
    /// 最近一轮重算覆盖到的序号
    pub completed_seq: u64,
    /// 已执行的重算轮数
    pub runs: u64,
    pub last_refresh_id: Option<String>,
    /// 最近一轮失败时的错误信息,成功后清空
    pub last_error: Option<String>,
    pub last_completed_at: Option<String>,
}

impl WorkerStatus {
    fn initial(snapshot: SnapshotKind) -> Self {
        Self {
            snapshot,
            phase: CachePhase::Fresh,
            requested_seq: 0,
            completed_seq: 0,
            runs: 0,
            last_refresh_id: None,
            last_error: None,
            last_completed_at: None,
        }
    }
}

#[derive(Default)]
struct PendingTriggers {
    seq: u64,
    counts: BTreeMap<String, usize>,
    sources: BTreeSet<String>,
}

impl PendingTriggers {
    /// 取走全部触发,返回 (覆盖到的序号, 合并后的批次)
    fn drain(&mut self) -> (u64, TriggerBatch) {
        let summary = self
            .counts
            .iter()
            .map(|(trigger, count)| format!("{} x{}", trigger, count))
            .collect::<Vec<_>>()
            .join(", ");
        let source = if self.sources.is_empty() {
            None
        } else {
            Some(self.sources.iter().cloned().collect::<Vec<_>>().join(","))
        };
        self.counts.clear();
        self.sources.clear();
        (self.seq, TriggerBatch { summary, source })
    }
}

struct WorkerShared {
    snapshot: SnapshotKind,
    pending: Mutex<PendingTriggers>,
    notify: Notify,
    /// 仅用于打断 debounce 等待
    shutdown: Notify,
    stopped: AtomicBool,
    status_tx: watch::Sender<WorkerStatus>,
}

/// worker 句柄 (可克隆,所有克隆共享同一个后台任务)
#[derive(Clone)]
pub struct SnapshotRefreshWorker {
    shared: Arc<WorkerShared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SnapshotRefreshWorker {
    /// 在当前 tokio 运行时上启动 worker
    ///
    /// `debounce` 为收到触发后等待更多触发的时间窗口,0 表示立即重算
    pub fn spawn(snapshot: SnapshotKind, recomputer: Arc<dyn SnapshotRecomputer>, debounce: Duration) -> Self {
        let (status_tx, _status_rx) = watch::channel(WorkerStatus::initial(snapshot));
        let shared = Arc::new(WorkerShared {
            snapshot,
            pending: Mutex::new(PendingTriggers::default()),
            notify: Notify::new(),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
            status_tx,
        });

        let handle = tokio::spawn(run_worker(shared.clone(), recomputer, debounce));
        tracing::debug!(
            snapshot = snapshot.as_str(),
            debounce_ms = debounce.as_millis() as u64,
            "快照刷新 worker 已启动"
        );

        Self {
            shared,
            task: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn snapshot(&self) -> SnapshotKind {
        self.shared.snapshot
    }

    /// 标记为脏并返回本次触发的序号 (非阻塞,可在同步代码中调用)
    pub fn mark_dirty(&self, trigger: &str, source: Option<&str>) -> u64 {
        let seq = {
            let mut pending = match self.shared.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.seq += 1;
            *pending.counts.entry(trigger.to_string()).or_insert(0) += 1;
            if let Some(source) = source {
                pending.sources.insert(source.to_string());
            }
            pending.seq
        };

        self.shared.status_tx.send_modify(|status| {
            status.requested_seq = status.requested_seq.max(seq);
            if status.phase == CachePhase::Fresh {
                status.phase = CachePhase::Dirty;
            }
        });
        self.shared.notify.notify_one();
        seq
    }

    /// 强制重算并等待覆盖本次请求的一轮完成
    ///
    /// 如果已有一轮正在排队,直接加入该轮,不另起并行重算。
    pub async fn refresh_now(&self, source: Option<&str>) -> MaterializerResult<WorkerStatus> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(MaterializerError::WorkerStopped);
        }

        let mut rx = self.shared.status_tx.subscribe();
        let my_seq = self.mark_dirty(OutcomeEventType::ManualRefresh.as_str(), source);

        let status = rx
            .wait_for(|s| s.completed_seq >= my_seq || s.phase == CachePhase::Stopped)
            .await
            .map_err(|_| MaterializerError::WorkerStopped)?
            .clone();

        if status.completed_seq < my_seq {
            return Err(MaterializerError::WorkerStopped);
        }
        match &status.last_error {
            Some(message) => Err(MaterializerError::RefreshFailed {
                snapshot: self.shared.snapshot.as_str().to_string(),
                message: message.clone(),
            }),
            None => Ok(status),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.shared.status_tx.subscribe()
    }

    /// 停止 worker;正在进行的一轮会完成,待处理触发被丢弃
    pub async fn shutdown(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
        self.shared.shutdown.notify_one();

        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(snapshot = self.shared.snapshot.as_str(), "worker 退出异常: {}", e);
            }
        }
    }
}

async fn run_worker(shared: Arc<WorkerShared>, recomputer: Arc<dyn SnapshotRecomputer>, debounce: Duration) {
    let snapshot = shared.snapshot;

    loop {
        // Notify 会保留一个许可,等待前的触发不会丢失
        shared.notify.notified().await;
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        if !debounce.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {}
                _ = shared.shutdown.notified() => break,
            }
            if shared.stopped.load(Ordering::SeqCst) {
                break;
            }
        }

        let (covered_seq, batch) = {
            let mut pending = match shared.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.drain()
        };

        // 上一轮已覆盖 (许可来自合并进上一轮的触发)
        if covered_seq <= shared.status_tx.borrow().completed_seq {
            continue;
        }

        shared.status_tx.send_modify(|status| status.phase = CachePhase::Recomputing);
        tracing::debug!(
            snapshot = snapshot.as_str(),
            covered_seq,
            triggers = %batch.summary,
            "开始合并重算"
        );

        let result = recomputer.recompute(snapshot, batch).await;

        let requested_now = match shared.pending.lock() {
            Ok(guard) => guard.seq,
            Err(poisoned) => poisoned.into_inner().seq,
        };
        shared.status_tx.send_modify(|status| {
            status.completed_seq = covered_seq;
            status.runs += 1;
            status.last_completed_at = Some(Utc::now().to_rfc3339());
            match &result {
                Ok(report) => {
                    status.last_refresh_id = Some(report.refresh_id.clone());
                    status.last_error = None;
                }
                Err(e) => {
                    // 失败只进入状态与日志,不回传给触发写操作
                    tracing::error!(snapshot = snapshot.as_str(), error = %e, "快照重算失败");
                    status.last_error = Some(e.to_string());
                }
            }
            status.phase = if requested_now > covered_seq {
                CachePhase::Dirty
            } else {
                CachePhase::Fresh
            };
        });
    }

    shared.status_tx.send_modify(|status| status.phase = CachePhase::Stopped);
    tracing::debug!(snapshot = snapshot.as_str(), "快照刷新 worker 已停止");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::refresh_service::RefreshReport;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// 计数的假重算器,可选择失败或阻塞一段时间
    struct CountingRecomputer {
        runs: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
        batches: Mutex<Vec<TriggerBatch>>,
    }

    impl CountingRecomputer {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay,
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SnapshotRecomputer for CountingRecomputer {
        async fn recompute(&self, kind: SnapshotKind, batch: TriggerBatch) -> MaterializerResult<RefreshReport> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            self.batches.lock().unwrap().push(batch);
            if self.fail.load(Ordering::SeqCst) {
                return Err(MaterializerError::Join("boom".to_string()));
            }
            Ok(RefreshReport {
                refresh_id: format!("run-{}", run),
                snapshot: kind,
                rows_affected: 0,
                duration_ms: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_burst_is_coalesced_into_one_run() {
        let recomputer = CountingRecomputer::new(Duration::from_millis(5));
        let worker = SnapshotRefreshWorker::spawn(SnapshotKind::Plo, recomputer.clone(), Duration::from_millis(50));

        for _ in 0..20 {
            worker.mark_dirty("ScoreChanged", Some("ScoreRepository"));
        }
        let status = worker.refresh_now(Some("test")).await.unwrap();

        assert_eq!(status.completed_seq, 21);
        assert_eq!(status.phase, CachePhase::Fresh);
        assert_eq!(recomputer.runs.load(Ordering::SeqCst), 1);
        let batches = recomputer.batches.lock().unwrap();
        assert_eq!(batches[0].summary, "ManualRefresh x1, ScoreChanged x20");
        assert_eq!(batches[0].source.as_deref(), Some("ScoreRepository,test"));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_never_runs_concurrently() {
        let recomputer = CountingRecomputer::new(Duration::from_millis(20));
        let worker = SnapshotRefreshWorker::spawn(SnapshotKind::Po, recomputer.clone(), Duration::ZERO);

        let mut waiters = Vec::new();
        for i in 0..5 {
            worker.mark_dirty("CloChanged", None);
            let w = worker.clone();
            waiters.push(tokio::spawn(async move { w.refresh_now(None).await }));
            tokio::time::sleep(Duration::from_millis(3 * i)).await;
        }
        for waiter in waiters {
            assert!(waiter.await.unwrap().is_ok());
        }

        assert_eq!(recomputer.max_in_flight.load(Ordering::SeqCst), 1);
        // 10 次触发远少于 10 轮
        assert!(recomputer.runs.load(Ordering::SeqCst) < 10);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_is_reported_to_status_not_to_writer() {
        let recomputer = CountingRecomputer::new(Duration::ZERO);
        recomputer.fail.store(true, Ordering::SeqCst);
        let worker = SnapshotRefreshWorker::spawn(SnapshotKind::Plo, recomputer.clone(), Duration::ZERO);

        // 写侧只拿到序号
        let seq = worker.mark_dirty("EnrollmentChanged", None);
        assert_eq!(seq, 1);

        let err = worker.refresh_now(None).await.unwrap_err();
        assert!(matches!(err, MaterializerError::RefreshFailed { .. }));
        assert!(worker.status().last_error.is_some());

        // 恢复后下一轮清空错误
        recomputer.fail.store(false, Ordering::SeqCst);
        let status = worker.refresh_now(None).await.unwrap();
        assert!(status.last_error.is_none());
        assert!(status.last_refresh_id.is_some());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_debounce_window() {
        let recomputer = CountingRecomputer::new(Duration::ZERO);
        let worker = SnapshotRefreshWorker::spawn(SnapshotKind::Plo, recomputer.clone(), Duration::from_secs(30));

        worker.mark_dirty("ScoreChanged", None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(2), worker.shutdown())
            .await
            .expect("shutdown 应立即打断 debounce 等待");
        assert!(started.elapsed() < Duration::from_secs(2));

        // 待处理触发被丢弃
        assert_eq!(recomputer.runs.load(Ordering::SeqCst), 0);
        let status = worker.status();
        assert_eq!(status.phase, CachePhase::Stopped);
        assert_eq!(status.completed_seq, 0);
    }

    #[tokio::test]
    async fn test_refresh_after_shutdown_is_rejected() {
        let recomputer = CountingRecomputer::new(Duration::ZERO);
        let worker = SnapshotRefreshWorker::spawn(SnapshotKind::Po, recomputer, Duration::ZERO);
        worker.shutdown().await;

        assert_eq!(worker.status().phase, CachePhase::Stopped);
        assert!(matches!(
            worker.refresh_now(None).await,
            Err(MaterializerError::WorkerStopped)
        ));
    }
}
