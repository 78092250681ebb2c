// ==========================================
// 车间生产执行调度系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、只读接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod assignment;
pub mod calendar;
pub mod change;
pub mod plan;
pub mod relation;
pub mod types;

// 重导出核心类型
pub use assignment::{
    AssignmentDraft, AssignmentEvent, ConsumedMaterial, MaterialRequirement, ReservedMaterial,
    WorkerAssignment,
};
pub use calendar::{CalendarProvider, ScheduleBlock, WorkerCalendar, WorkerCalendars};
pub use change::{BusMessage, ChangeEvent};
pub use plan::{MaterialInput, NewPlan, NewPlanNode, PlanNode, ProductionPlan, StationCandidate};
pub use relation::{EntityRef, EntityRelation, RelationTarget};
pub use types::{
    AssignmentMode, AssignmentStatus, BlockType, ChangeOperation, EntityType,
    MaterialReservationStatus, PlanStatus, RelationType, SchedulingMode,
};
