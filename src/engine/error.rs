// ==========================================
// 学习成果达成度引擎 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 分母为零不是错误 (NotApplicable),此处只列真正的失败
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("计算范围不存在: {scope} id={id}")]
    NotFound { scope: String, id: String },

    /// 等级分数线非单调,统计计算拒绝执行
    #[error("等级分数线配置无效: {0}")]
    InvalidCriteriaGrade(String),

    #[error("计算已取消")]
    Cancelled,

    #[error("计算超过截止时间")]
    DeadlineExceeded,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type EngineResult<T> = Result<T, EngineError>;
