// ==========================================
// 学习成果达成度引擎 - 计算上下文 (取消/截止时间)
// ==========================================
// 职责: 让耗时的专业级报表可以被中途取消,不泄漏计算
// 说明: 计算成本 ~ 学生数 × 作业数 × 成果扇出
// ==========================================

use crate::engine::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 计算上下文
///
/// 克隆后共享同一个取消标志;截止时间按值复制。
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl EvalContext {
    /// 无截止时间、未取消的上下文
    pub fn background() -> Self {
        Self::default()
    }

    /// 自现在起 `timeout` 后到期
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// 0 表示不设截止时间 (对应配置 report.deadline_ms)
    pub fn from_deadline_ms(deadline_ms: u64) -> Self {
        if deadline_ms == 0 {
            Self::background()
        } else {
            Self::with_timeout(Duration::from_millis(deadline_ms))
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 检查点: 已取消或超时则返回错误
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}
