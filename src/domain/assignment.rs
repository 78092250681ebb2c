// ==========================================
// 车间生产执行调度系统 - 工单（工作包）领域模型
// ==========================================
// 职责: WorkerAssignment 及排程草案、物料记账结构
// 红线: node_id 为整型外键, 不做字符串匹配
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{AssignmentStatus, MaterialReservationStatus, SchedulingMode};

// ==========================================
// 物料记账
// ==========================================

/// 工单物料需求（已按计划产出量缩放）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRequirement {
    pub material_code: String,
    /// 单位产出投入量
    pub quantity_per_unit: f64,
    /// 按计划产出量缩放后的需求量
    pub required_quantity: f64,
    pub from_prior_node: bool,
}

/// 已预留物料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservedMaterial {
    pub material_code: String,
    pub reservation_id: String,
    pub quantity: f64,
}

/// 已消耗物料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumedMaterial {
    pub material_code: String,
    pub quantity: f64,
}

// ==========================================
// AssignmentDraft - 排程草案
// ==========================================
// 排程引擎输出, 投产时物化为 WorkerAssignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentDraft {
    pub node_id: i64,
    pub unit_index: u32,            // 拆分单元序号（从 1 开始）
    pub worker_id: Option<i64>,
    pub station_id: Option<i64>,
    pub substation_ids: Vec<i64>,
    pub scheduling_mode: SchedulingMode,
    pub urgent: bool,
    pub nominal_time_min: f64,
    pub effective_time_min: f64,
    pub planned_output_quantity: f64,
    pub materials_required: Vec<MaterialRequirement>,
    pub estimated_start: NaiveDateTime,
    pub estimated_end: NaiveDateTime,
    /// 是否由引擎自动确认派工（AUTO 模式且解析出人员）
    pub auto_confirmed: bool,
}

// ==========================================
// WorkerAssignment - 工单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignment {
    // ===== 标识 =====
    pub assignment_id: i64,
    pub code: String,               // 工作包编码 ({plan_code}-WP-001)
    pub plan_id: i64,
    pub node_id: i64,
    pub unit_index: u32,

    // ===== 派工 =====
    pub worker_id: Option<i64>,
    pub station_id: Option<i64>,
    pub substation_ids: Vec<i64>,
    pub status: AssignmentStatus,
    pub scheduling_mode: SchedulingMode,
    pub urgent: bool,
    /// 队列序号: 1 = 当前活动, 2+ = 排队; 终态为 None
    pub sequence_number: Option<i32>,

    // ===== 工时 =====
    pub nominal_time_min: f64,
    pub effective_time_min: f64,
    /// 节点效率覆盖值（消耗折算用）
    pub efficiency_override: Option<f64>,

    // ===== 物料 =====
    pub planned_output_quantity: f64,
    pub actual_output_quantity: Option<f64>,
    pub output_material_code: Option<String>,
    pub materials_required: Vec<MaterialRequirement>,
    pub materials_reserved: Vec<ReservedMaterial>,
    pub materials_consumed: Vec<ConsumedMaterial>,
    pub material_reservation_status: MaterialReservationStatus,

    // ===== 时间 =====
    pub estimated_start: Option<NaiveDateTime>,
    pub estimated_end: Option<NaiveDateTime>,
    pub optimized_start: Option<NaiveDateTime>,
    pub optimized_end: Option<NaiveDateTime>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub cancel_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl WorkerAssignment {
    /// 是否占用队列（非终态）
    pub fn is_queued(&self) -> bool {
        !self.status.is_terminal()
    }
}

// ==========================================
// AssignmentEvent - 状态机事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentEvent {
    /// PENDING → ASSIGNED（可同时改派人员/工位）
    Assign {
        worker_id: Option<i64>,
        station_id: Option<i64>,
    },
    /// ASSIGNED → PENDING（撤回派工）
    Unassign,
    /// ASSIGNED → STARTED（预留物料）
    Start,
    /// STARTED → COMPLETED（消耗物料并入库产出）
    Complete { actual_output: Option<f64> },
    /// 任意非终态 → CANCELLED（释放预留）
    Cancel { reason: Option<String> },
}

impl AssignmentEvent {
    /// 事件目标状态
    pub fn target_status(&self) -> AssignmentStatus {
        match self {
            AssignmentEvent::Assign { .. } => AssignmentStatus::Assigned,
            AssignmentEvent::Unassign => AssignmentStatus::Pending,
            AssignmentEvent::Start => AssignmentStatus::Started,
            AssignmentEvent::Complete { .. } => AssignmentStatus::Completed,
            AssignmentEvent::Cancel { .. } => AssignmentStatus::Cancelled,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AssignmentEvent::Assign { .. } => "ASSIGN",
            AssignmentEvent::Unassign => "UNASSIGN",
            AssignmentEvent::Start => "START",
            AssignmentEvent::Complete { .. } => "COMPLETE",
            AssignmentEvent::Cancel { .. } => "CANCEL",
        }
    }
}
