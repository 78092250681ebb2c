// ==========================================
// 车间生产执行调度系统 - 核心库
// ==========================================
// 职责: 工序计划图 → 排程 → 派工队列 → 工单状态流转 → 变更推送
// 技术栈: Rust + SQLite + tokio
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 通知层 - 变更订阅与推送
pub mod notify;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AssignmentMode, AssignmentStatus, ChangeOperation, EntityType, PlanStatus, RelationType,
    SchedulingMode,
};

// 领域实体
pub use domain::{
    AssignmentEvent, ChangeEvent, NewPlan, NewPlanNode, PlanNode, ProductionPlan, WorkerAssignment,
};

// 引擎
pub use engine::{AssignmentLifecycle, MaterialLedger, SchedulingEngine};

// 通知
pub use notify::{NotificationBus, Subscription, SubscriptionFilter};

// API
pub use api::{ApiError, ApiResult, ProductionApi, RelationApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "车间生产执行调度系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
