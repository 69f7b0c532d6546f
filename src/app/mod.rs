// ==========================================
// 学习成果达成度引擎 - 应用层
// ==========================================
// 职责: 组装仓储、引擎、缓存物化器与 API
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState, DB_PATH_ENV};
