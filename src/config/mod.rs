// ==========================================
// 车间生产执行调度系统 - 配置层
// ==========================================
// 职责: 系统配置读取与覆写
// 存储: config_kv 表（scope_id = 'global'）
// ==========================================

pub mod config_manager;
pub mod execution_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager, ExecutionConfig};
pub use execution_config_trait::ExecutionConfigReader;
