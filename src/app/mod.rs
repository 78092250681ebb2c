// ==========================================
// 车间生产执行调度系统 - 应用层
// ==========================================
// 职责: 装配仓储/引擎/API/通知总线
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
