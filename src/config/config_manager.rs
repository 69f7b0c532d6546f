// ==========================================
// 学习成果达成度引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope, 目前只用 global)
// ==========================================

use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// EngineConfig - 引擎运行参数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 缓存 worker 合并触发的等待窗口 (毫秒)
    pub cache_debounce_ms: u64,
    /// 单次报表计算的截止时间 (毫秒, 0 = 不限)
    pub report_deadline_ms: u64,
    /// 直方图首段上界
    pub histogram_floor: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_debounce_ms: defaults::CACHE_DEBOUNCE_MS,
            report_deadline_ms: defaults::REPORT_DEADLINE_MS,
            histogram_floor: defaults::HISTOGRAM_FLOOR,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 会对传入连接再次应用统一 PRAGMA (幂等)。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值 (scope_id='global')
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取数值配置;缺失或无法解析时使用默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        match self.get_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!("配置项 {} 的值 {:?} 无法解析,使用默认值 {}", key, raw, default);
                    Ok(default)
                }
            },
        }
    }

    /// 获取 global 配置快照 (JSON, 按 key 排序)
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    // ===== 引擎参数 =====

    pub fn get_cache_debounce_ms(&self) -> Result<u64, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::CACHE_DEBOUNCE_MS, defaults::CACHE_DEBOUNCE_MS)
    }

    pub fn get_report_deadline_ms(&self) -> Result<u64, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::REPORT_DEADLINE_MS, defaults::REPORT_DEADLINE_MS)
    }

    pub fn get_histogram_floor(&self) -> Result<u32, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::HISTOGRAM_FLOOR, defaults::HISTOGRAM_FLOOR)
    }

    /// 一次读取全部引擎参数
    pub fn get_engine_config(&self) -> Result<EngineConfig, Box<dyn Error>> {
        Ok(EngineConfig {
            cache_debounce_ms: self.get_cache_debounce_ms()?,
            report_deadline_ms: self.get_report_deadline_ms()?,
            histogram_floor: self.get_histogram_floor()?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 缓存物化
    pub const CACHE_DEBOUNCE_MS: &str = "cache.debounce_ms";

    // 报表
    pub const REPORT_DEADLINE_MS: &str = "report.deadline_ms";

    // 成绩统计
    pub const HISTOGRAM_FLOOR: &str = "statistics.histogram_floor";
}

pub mod defaults {
    pub const CACHE_DEBOUNCE_MS: u64 = 250;
    pub const REPORT_DEADLINE_MS: u64 = 0;
    pub const HISTOGRAM_FLOOR: u32 = 50;
}
