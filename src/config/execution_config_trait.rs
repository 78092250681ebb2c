// ==========================================
// 车间生产执行调度系统 - 执行配置读取 Trait
// ==========================================
// 职责: 定义排程/通知所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::SchedulingMode;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// ExecutionConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ExecutionConfigReader: Send + Sync {
    // ===== 排程配置 =====

    /// 计划未指定默认效率时使用的效率
    ///
    /// # 默认值
    /// - 1.0
    async fn get_default_efficiency(&self) -> Result<f64, Box<dyn Error>>;

    /// 日历吸附向后搜索的天数
    ///
    /// # 默认值
    /// - 14
    async fn get_snap_horizon_days(&self) -> Result<u32, Box<dyn Error>>;

    /// 新建节点的默认排队模式
    ///
    /// # 默认值
    /// - FIFO
    async fn get_default_scheduling_mode(&self) -> Result<SchedulingMode, Box<dyn Error>>;

    // ===== 通知配置 =====

    /// 心跳周期（秒）
    ///
    /// # 默认值
    /// - 15
    async fn get_heartbeat_interval_secs(&self) -> Result<u64, Box<dyn Error>>;

    /// 每订阅者缓冲条数
    ///
    /// # 默认值
    /// - 256
    async fn get_subscriber_buffer(&self) -> Result<usize, Box<dyn Error>>;
}
