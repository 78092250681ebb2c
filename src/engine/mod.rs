// ==========================================
// 车间生产执行调度系统 - 引擎层
// ==========================================
// 职责: 计划图校验、排程、队列排序、工单状态机
// 红线: Engine 不拼 SQL, 所有拒绝必须输出 reason
// ==========================================

pub mod calendar;
pub mod error;
pub mod events;
pub mod graph;
pub mod ledger;
pub mod lifecycle;
pub mod queue;
pub mod scheduler;

// 重导出核心引擎
pub use calendar::{snap_to_work, DEFAULT_SNAP_HORIZON_DAYS};
pub use error::{EngineError, EngineResult};
pub use events::{ChangePublisher, NoOpChangePublisher, OptionalChangePublisher};
pub use graph::{topological_order, validate, PlanValidationError, ValidationErrorKind};
pub use ledger::{
    Consumption, LedgerEffects, LedgerError, LedgerResult, MaterialLedger, PlannedReservation,
    ReserveRequest,
};
pub use lifecycle::{check_transition, AssignmentLifecycle, TransitionContext, TransitionOutcome};
pub use queue::{compact_queue, KeyedLockGuard, KeyedLocks, QueueKey, QueuePosition};
pub use scheduler::{ScheduleContext, SchedulingEngine};
