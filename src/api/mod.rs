// ==========================================
// 学习成果达成度引擎 - API 层
// ==========================================
// 职责: 提供报表与缓存 API 接口,供命令行和上层应用调用
// ==========================================

pub mod error;
pub mod report_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use report_api::{
    CacheStatusView, CourseAttainmentReport, OutcomeReportApi, ProgrammeSuccessRateReport,
    StudentOutcomeHistory,
};
