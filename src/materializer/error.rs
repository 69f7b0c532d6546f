// ==========================================
// 学习成果达成度引擎 - 缓存物化错误类型
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaterializerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// 阻塞任务 panic 或被取消
    #[error("快照重算任务异常退出: {0}")]
    Join(String),

    #[error("快照 worker 已停止")]
    WorkerStopped,

    /// 手动刷新等到的那一轮重算失败
    #[error("快照 {snapshot} 重算失败: {message}")]
    RefreshFailed { snapshot: String, message: String },
}

pub type MaterializerResult<T> = Result<T, MaterializerError>;
