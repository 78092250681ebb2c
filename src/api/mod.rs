// ==========================================
// 车间生产执行调度系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口, 组合仓储/引擎/通知总线
// ==========================================

pub mod error;
pub mod production_api;
pub mod relation_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult, ValidationViolation};
pub use production_api::{Clock, ProductionApi};
pub use relation_api::RelationApi;
