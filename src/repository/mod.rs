// ==========================================
// 学习成果达成度引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod attainment_repo;
pub mod cache_refresh_repo;
pub mod course_repo;
pub mod error;
pub mod snapshot_repo;

// 重导出核心仓储
pub use attainment_repo::AttainmentRepository;
pub use cache_refresh_repo::{CacheRefreshLogEntity, CacheRefreshRepository};
pub use course_repo::CourseRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use snapshot_repo::{OutcomeSnapshotRow, SnapshotRepository};
