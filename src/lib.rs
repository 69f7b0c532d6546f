// ==========================================
// 学习成果达成度引擎 - 核心库
// ==========================================
// 系统定位: 认证评估支持 (CLO → PO / PLO / SO 达成度汇总)
// 技术栈: Rust + SQLite + tokio
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 构图 / 判定 / 汇总 / 统计
pub mod engine;

// 缓存物化层 - PLO / PO 课程快照
pub mod materializer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 报表接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    AttainmentScope, CourseInfo, CriteriaGrade, EnrollmentStatus, LetterGrade, OutcomeDataset,
    OutcomeKind, SnapshotKind, Verdict,
};

pub use engine::{
    EvalContext, GradeStatisticsCalculator, HistogramLayout, OutcomeGraphBuilder,
    PopulationAggregator, ThresholdEvaluator,
};

pub use materializer::{CacheRefreshScope, OutcomeCacheMaterializer};

pub use api::{ApiError, ApiResult, OutcomeReportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "学习成果达成度引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
