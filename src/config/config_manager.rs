// ==========================================
// 车间生产执行调度系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// 约定: 值无法解析时回落默认值并告警, 不中断调用方
// ==========================================

use crate::config::execution_config_trait::ExecutionConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::types::SchedulingMode;
use crate::engine::calendar::DEFAULT_SNAP_HORIZON_DAYS;
use crate::engine::graph::is_valid_efficiency;
use crate::notify::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_SUBSCRIBER_BUFFER};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ExecutionConfig - 配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub default_efficiency: f64,
    pub snap_horizon_days: u32,
    pub default_scheduling_mode: SchedulingMode,
    pub heartbeat_interval_secs: u64,
    pub subscriber_buffer: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_efficiency: 1.0,
            snap_horizon_days: DEFAULT_SNAP_HORIZON_DAYS,
            default_scheduling_mode: SchedulingMode::Fifo,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
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
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
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

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value, "配置已更新");
        Ok(())
    }

    /// 读取并解析配置; 缺失或格式错误时回落默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr,
    {
        let raw = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }

    /// 一次读取全部执行配置（同步入口, 供启动装配使用）
    pub fn load_execution_config(&self) -> Result<ExecutionConfig, Box<dyn Error>> {
        let defaults = ExecutionConfig::default();

        let mut default_efficiency =
            self.get_parsed_or_default(config_keys::SCHEDULE_DEFAULT_EFFICIENCY, defaults.default_efficiency)?;
        if !is_valid_efficiency(default_efficiency) {
            tracing::warn!(
                config_key = config_keys::SCHEDULE_DEFAULT_EFFICIENCY,
                value = default_efficiency,
                "默认效率超出 (0, 1]，使用默认值"
            );
            default_efficiency = defaults.default_efficiency;
        }

        let mode_raw = self.get_config_value(config_keys::DEFAULT_SCHEDULING_MODE)?;
        let default_scheduling_mode = match mode_raw {
            None => defaults.default_scheduling_mode,
            Some(raw) => SchedulingMode::from_str(&raw.trim().to_uppercase()).unwrap_or_else(|| {
                tracing::warn!(
                    config_key = config_keys::DEFAULT_SCHEDULING_MODE,
                    raw_value = %raw,
                    "排队模式配置无法识别，使用 FIFO"
                );
                defaults.default_scheduling_mode
            }),
        };

        let subscriber_buffer = self
            .get_parsed_or_default(config_keys::SUBSCRIBER_BUFFER, defaults.subscriber_buffer)?
            .max(1);
        let heartbeat_interval_secs = self
            .get_parsed_or_default(config_keys::HEARTBEAT_INTERVAL_SECS, defaults.heartbeat_interval_secs)?
            .max(1);

        Ok(ExecutionConfig {
            default_efficiency,
            snap_horizon_days: self
                .get_parsed_or_default(config_keys::SNAP_HORIZON_DAYS, defaults.snap_horizon_days)?,
            default_scheduling_mode,
            heartbeat_interval_secs,
            subscriber_buffer,
        })
    }
}

// ==========================================
// ExecutionConfigReader Trait 实现
// ==========================================
#[async_trait]
impl ExecutionConfigReader for ConfigManager {
    async fn get_default_efficiency(&self) -> Result<f64, Box<dyn Error>> {
        Ok(self.load_execution_config()?.default_efficiency)
    }

    async fn get_snap_horizon_days(&self) -> Result<u32, Box<dyn Error>> {
        self.get_parsed_or_default(config_keys::SNAP_HORIZON_DAYS, DEFAULT_SNAP_HORIZON_DAYS)
    }

    async fn get_default_scheduling_mode(&self) -> Result<SchedulingMode, Box<dyn Error>> {
        Ok(self.load_execution_config()?.default_scheduling_mode)
    }

    async fn get_heartbeat_interval_secs(&self) -> Result<u64, Box<dyn Error>> {
        Ok(self.load_execution_config()?.heartbeat_interval_secs)
    }

    async fn get_subscriber_buffer(&self) -> Result<usize, Box<dyn Error>> {
        Ok(self.load_execution_config()?.subscriber_buffer)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 排程
    pub const SCHEDULE_DEFAULT_EFFICIENCY: &str = "schedule.default_efficiency";
    pub const SNAP_HORIZON_DAYS: &str = "schedule.snap_horizon_days";
    pub const DEFAULT_SCHEDULING_MODE: &str = "schedule.default_scheduling_mode";

    // 通知
    pub const HEARTBEAT_INTERVAL_SECS: &str = "notify.heartbeat_interval_secs";
    pub const SUBSCRIBER_BUFFER: &str = "notify.subscriber_buffer";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn manager() -> ConfigManager {
        let conn = Arc::new(Mutex::new(open_in_memory().unwrap()));
        ConfigManager::from_connection(conn).unwrap()
    }

    #[test]
    fn test_defaults_when_table_empty() {
        let config = manager().load_execution_config().unwrap();
        assert_eq!(config, ExecutionConfig::default());
    }

    #[test]
    fn test_overrides_are_read() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::SCHEDULE_DEFAULT_EFFICIENCY, "0.9").unwrap();
        mgr.set_global_config_value(config_keys::DEFAULT_SCHEDULING_MODE, "priority").unwrap();
        mgr.set_global_config_value(config_keys::SUBSCRIBER_BUFFER, "32").unwrap();

        let config = mgr.load_execution_config().unwrap();
        assert_eq!(config.default_efficiency, 0.9);
        assert_eq!(config.default_scheduling_mode, SchedulingMode::Priority);
        assert_eq!(config.subscriber_buffer, 32);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::SCHEDULE_DEFAULT_EFFICIENCY, "1.5").unwrap();
        mgr.set_global_config_value(config_keys::SNAP_HORIZON_DAYS, "soon").unwrap();
        mgr.set_global_config_value(config_keys::DEFAULT_SCHEDULING_MODE, "LIFO").unwrap();

        let config = mgr.load_execution_config().unwrap();
        assert_eq!(config.default_efficiency, 1.0);
        assert_eq!(config.snap_horizon_days, DEFAULT_SNAP_HORIZON_DAYS);
        assert_eq!(config.default_scheduling_mode, SchedulingMode::Fifo);
    }

    #[tokio::test]
    async fn test_reader_trait() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::HEARTBEAT_INTERVAL_SECS, "5").unwrap();
        let reader: &dyn ExecutionConfigReader = &mgr;
        assert_eq!(reader.get_heartbeat_interval_secs().await.unwrap(), 5);
        assert_eq!(reader.get_snap_horizon_days().await.unwrap(), DEFAULT_SNAP_HORIZON_DAYS);
    }
}
