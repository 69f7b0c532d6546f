// ==========================================
// 学习成果达成度引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::OutcomeReportApi;
use crate::config::config_manager::ConfigManager;
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::events::OptionalEventPublisher;
use crate::materializer::OutcomeCacheMaterializer;
use crate::repository::{
    AttainmentRepository, CacheRefreshRepository, CourseRepository, SnapshotRepository,
};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 达成度报表API
    pub report_api: Arc<OutcomeReportApi>,

    /// 课程写仓储 (写入后发布缓存失效事件)
    pub course_repo: Arc<CourseRepository>,

    pub config_manager: Arc<ConfigManager>,

    /// 快照缓存物化器
    pub materializer: Arc<OutcomeCacheMaterializer>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// 必须在 tokio 运行时内调用: 快照 worker 在当前运行时上启动。
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        // 共享连接
        let conn = open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库结构初始化失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // 配置
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let engine_config = config_manager
            .get_engine_config()
            .map_err(|e| format!("读取引擎配置失败: {}", e))?;

        // ==========================================
        // 缓存物化层
        // ==========================================
        let materializer = Arc::new(OutcomeCacheMaterializer::spawn(
            conn.clone(),
            Duration::from_millis(engine_config.cache_debounce_ms),
        ));
        let event_publisher = OptionalEventPublisher::with_publisher(materializer.publisher());

        // ==========================================
        // Repository层
        // ==========================================
        let attainment_repo = Arc::new(AttainmentRepository::new(conn.clone()));
        let snapshot_repo = Arc::new(SnapshotRepository::new(conn.clone()));
        let cache_refresh_repo = Arc::new(CacheRefreshRepository::new(conn.clone()));
        let course_repo = Arc::new(CourseRepository::with_event_publisher(conn, event_publisher));

        // ==========================================
        // API层
        // ==========================================
        let report_api = Arc::new(OutcomeReportApi::new(
            attainment_repo,
            snapshot_repo,
            cache_refresh_repo,
            config_manager.clone(),
            materializer.clone(),
        ));

        tracing::info!(
            debounce_ms = engine_config.cache_debounce_ms,
            deadline_ms = engine_config.report_deadline_ms,
            histogram_floor = engine_config.histogram_floor,
            "AppState初始化完成"
        );

        Ok(Self {
            db_path,
            report_api,
            course_repo,
            config_manager,
            materializer,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }

    /// 停止后台 worker
    pub async fn shutdown(&self) {
        self.materializer.shutdown().await;
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

pub const DB_PATH_ENV: &str = "OUTCOME_DB_PATH";

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 OUTCOME_DB_PATH (非空时)
/// - 否则: 用户数据目录/outcome-attainment/outcome_attainment.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./outcome_attainment.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("outcome-attainment");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("outcome_attainment.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[tokio::test]
    async fn test_app_state_on_fresh_database() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let db_path = file.path().to_string_lossy().to_string();

        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.get_db_path(), db_path);

        let status = state.report_api.cache_status().unwrap();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.latest_log.is_none()));

        state.shutdown().await;
    }
}
