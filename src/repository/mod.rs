// ==========================================
// 车间生产执行调度系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: 多行变更使用事务, 单次操作全部成功或全部不生效
// ==========================================

pub mod assignment_repo;
pub mod calendar_repo;
pub mod error;
pub mod material_ledger_repo;
pub mod plan_repo;
pub mod relation_repo;
pub mod row_utils;
pub mod sequence_repo;

// 重导出核心仓储
pub use assignment_repo::{AssignmentRepository, PlanProgress};
pub use calendar_repo::WorkerCalendarRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use material_ledger_repo::{SqliteMaterialLedger, StockLevel};
pub use plan_repo::{PlanNodeRepository, PlanRepository};
pub use relation_repo::{LinkOutcome, RelationRepository};
pub use sequence_repo::CodeSequenceRepository;
