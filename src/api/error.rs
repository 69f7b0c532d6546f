// ==========================================
// 学习成果达成度引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型,把仓储/引擎/物化层错误转换为调用方可读的错误消息
// ==========================================

use crate::engine::error::EngineError;
use crate::materializer::error::MaterializerError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    /// 报表计算被取消或超过截止时间
    #[error("计算已中止: {0}")]
    Cancelled(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 缓存错误
    // ==========================================
    #[error("达成度缓存刷新失败: {0}")]
    CacheRefreshFailed(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseTransactionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::ValidationError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::ValidationError(format!("外键约束违反: {}", msg))
            }
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound { scope, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", scope, id))
            }
            EngineError::InvalidCriteriaGrade(msg) => ApiError::ValidationError(msg),
            EngineError::Cancelled => ApiError::Cancelled("请求已取消".to_string()),
            EngineError::DeadlineExceeded => ApiError::Cancelled("超过报表截止时间".to_string()),
            EngineError::Repository(err) => err.into(),
        }
    }
}

// ==========================================
// 从 MaterializerError 转换
// ==========================================
impl From<MaterializerError> for ApiError {
    fn from(err: MaterializerError) -> Self {
        match err {
            MaterializerError::Engine(err) => err.into(),
            MaterializerError::Repository(err) => err.into(),
            MaterializerError::RefreshFailed { snapshot, message } => {
                ApiError::CacheRefreshFailed(format!("{}: {}", snapshot, message))
            }
            other => ApiError::CacheRefreshFailed(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "Course".to_string(),
            id: "42".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("Course"));
                assert!(msg.contains("42"));
            }
            _ => panic!("Expected NotFound"),
        }

        let api_err: ApiError = RepositoryError::FieldValueError {
            field: "expected_passing_clo_percentage".to_string(),
            message: "超出范围".to_string(),
        }
        .into();
        assert!(matches!(api_err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn test_engine_error_conversion() {
        assert!(matches!(ApiError::from(EngineError::Cancelled), ApiError::Cancelled(_)));
        assert!(matches!(
            ApiError::from(EngineError::DeadlineExceeded),
            ApiError::Cancelled(_)
        ));
        assert!(matches!(
            ApiError::from(EngineError::InvalidCriteriaGrade("A < B".to_string())),
            ApiError::ValidationError(_)
        ));
        let nested = EngineError::Repository(RepositoryError::LockError("poisoned".to_string()));
        assert!(matches!(ApiError::from(nested), ApiError::DatabaseConnectionError(_)));
    }

    #[test]
    fn test_materializer_error_conversion() {
        let api_err: ApiError = MaterializerError::RefreshFailed {
            snapshot: "PLO".to_string(),
            message: "disk full".to_string(),
        }
        .into();
        match api_err {
            ApiError::CacheRefreshFailed(msg) => assert_eq!(msg, "PLO: disk full"),
            _ => panic!("Expected CacheRefreshFailed"),
        }
        assert!(matches!(
            ApiError::from(MaterializerError::WorkerStopped),
            ApiError::CacheRefreshFailed(_)
        ));
    }
}
