// ==========================================
// 车间生产执行调度系统 - 领域类型定义
// ==========================================
// 职责: 状态机状态、派工模式、关系类型等枚举
// 约定: 数据库存储为 SCREAMING_SNAKE_CASE 字符串
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 生产计划状态 (Plan Status)
// ==========================================
// 流转: DRAFT → RELEASED → ACTIVE → COMPLETED
//       任意非终态 → CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Draft,     // 草稿
    Released,  // 已下达
    Active,    // 执行中
    Completed, // 已完成
    Cancelled, // 已取消
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl PlanStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(PlanStatus::Draft),
            "RELEASED" => Some(PlanStatus::Released),
            "ACTIVE" => Some(PlanStatus::Active),
            "COMPLETED" => Some(PlanStatus::Completed),
            "CANCELLED" => Some(PlanStatus::Cancelled),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Released => "RELEASED",
            PlanStatus::Active => "ACTIVE",
            PlanStatus::Completed => "COMPLETED",
            PlanStatus::Cancelled => "CANCELLED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Cancelled)
    }

    /// 是否允许迁移到目标状态
    pub fn can_transition_to(&self, to: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (self, to),
            (Draft, Released)
                | (Released, Active)
                | (Active, Completed)
                | (Draft, Cancelled)
                | (Released, Cancelled)
                | (Active, Cancelled)
        )
    }
}

// ==========================================
// 派工模式 (Assignment Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentMode {
    Auto,   // 引擎自动选择工位/人员
    Manual, // 人工指定
}

impl fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl AssignmentMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AUTO" => Some(AssignmentMode::Auto),
            "MANUAL" => Some(AssignmentMode::Manual),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentMode::Auto => "AUTO",
            AssignmentMode::Manual => "MANUAL",
        }
    }
}

// ==========================================
// 工单状态 (Assignment Status)
// ==========================================
// 流转: PENDING → ASSIGNED → STARTED → COMPLETED
//       PENDING/ASSIGNED/STARTED → CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Pending,   // 待派工
    Assigned,  // 已派工
    Started,   // 已开工
    Completed, // 已完工
    Cancelled, // 已取消
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl AssignmentStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(AssignmentStatus::Pending),
            "ASSIGNED" => Some(AssignmentStatus::Assigned),
            "STARTED" => Some(AssignmentStatus::Started),
            "COMPLETED" => Some(AssignmentStatus::Completed),
            "CANCELLED" => Some(AssignmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "PENDING",
            AssignmentStatus::Assigned => "ASSIGNED",
            AssignmentStatus::Started => "STARTED",
            AssignmentStatus::Completed => "COMPLETED",
            AssignmentStatus::Cancelled => "CANCELLED",
        }
    }

    /// 是否为终态（COMPLETED / CANCELLED）
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Completed | AssignmentStatus::Cancelled)
    }
}

// ==========================================
// 排队模式 (Scheduling Mode)
// ==========================================
// FIFO: 按到达顺序
// PRIORITY: 紧急优先，其次按到达顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingMode {
    Fifo,
    Priority,
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SchedulingMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "FIFO" => Some(SchedulingMode::Fifo),
            "PRIORITY" => Some(SchedulingMode::Priority),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SchedulingMode::Fifo => "FIFO",
            SchedulingMode::Priority => "PRIORITY",
        }
    }
}

// ==========================================
// 物料预留状态 (Material Reservation Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialReservationStatus {
    None,     // 尚未预留
    Reserved, // 已预留
    Consumed, // 已消耗
    Released, // 已释放
}

impl fmt::Display for MaterialReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl MaterialReservationStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "RESERVED" => MaterialReservationStatus::Reserved,
            "CONSUMED" => MaterialReservationStatus::Consumed,
            "RELEASED" => MaterialReservationStatus::Released,
            _ => MaterialReservationStatus::None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            MaterialReservationStatus::None => "NONE",
            MaterialReservationStatus::Reserved => "RESERVED",
            MaterialReservationStatus::Consumed => "CONSUMED",
            MaterialReservationStatus::Released => "RELEASED",
        }
    }
}

// ==========================================
// 实体类型 (Entity Type)
// ==========================================
// 关系表 source_type/target_type 与变更事件 entity_type 共用
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Plan,
    PlanNode,
    Assignment,
    Worker,
    Station,
    Substation,
    Operation,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl EntityType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAN" => Some(EntityType::Plan),
            "PLAN_NODE" => Some(EntityType::PlanNode),
            "ASSIGNMENT" => Some(EntityType::Assignment),
            "WORKER" => Some(EntityType::Worker),
            "STATION" => Some(EntityType::Station),
            "SUBSTATION" => Some(EntityType::Substation),
            "OPERATION" => Some(EntityType::Operation),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            EntityType::Plan => "PLAN",
            EntityType::PlanNode => "PLAN_NODE",
            EntityType::Assignment => "ASSIGNMENT",
            EntityType::Worker => "WORKER",
            EntityType::Station => "STATION",
            EntityType::Substation => "SUBSTATION",
            EntityType::Operation => "OPERATION",
        }
    }
}

// ==========================================
// 关系类型 (Relation Type)
// ==========================================
// 六类多对多/候选关系统一存放于 entity_relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    WorkerStation,     // 人员 ↔ 工位
    WorkerOperation,   // 人员 ↔ 工序（资质）
    StationOperation,  // 工位 ↔ 工序（能力）
    NodeStation,       // 节点 ↔ 候选工位（带优先级）
    NodeSubstation,    // 节点 ↔ 子工位
    NodePredecessor,   // 节点 ↔ 前置节点（图的边）
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl RelationType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "WORKER_STATION" => Some(RelationType::WorkerStation),
            "WORKER_OPERATION" => Some(RelationType::WorkerOperation),
            "STATION_OPERATION" => Some(RelationType::StationOperation),
            "NODE_STATION" => Some(RelationType::NodeStation),
            "NODE_SUBSTATION" => Some(RelationType::NodeSubstation),
            "NODE_PREDECESSOR" => Some(RelationType::NodePredecessor),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            RelationType::WorkerStation => "WORKER_STATION",
            RelationType::WorkerOperation => "WORKER_OPERATION",
            RelationType::StationOperation => "STATION_OPERATION",
            RelationType::NodeStation => "NODE_STATION",
            RelationType::NodeSubstation => "NODE_SUBSTATION",
            RelationType::NodePredecessor => "NODE_PREDECESSOR",
        }
    }

    /// 关系两端的实体类型 (source, target)
    pub fn endpoints(&self) -> (EntityType, EntityType) {
        match self {
            RelationType::WorkerStation => (EntityType::Worker, EntityType::Station),
            RelationType::WorkerOperation => (EntityType::Worker, EntityType::Operation),
            RelationType::StationOperation => (EntityType::Station, EntityType::Operation),
            RelationType::NodeStation => (EntityType::PlanNode, EntityType::Station),
            RelationType::NodeSubstation => (EntityType::PlanNode, EntityType::Substation),
            RelationType::NodePredecessor => (EntityType::PlanNode, EntityType::PlanNode),
        }
    }
}

// ==========================================
// 日历块类型 (Schedule Block Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Work,  // 工作时段
    Break, // 休息时段
}

impl BlockType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "WORK" => Some(BlockType::Work),
            "BREAK" => Some(BlockType::Break),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            BlockType::Work => "WORK",
            BlockType::Break => "BREAK",
        }
    }
}

// ==========================================
// 变更操作 (Change Operation)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOperation::Insert => write!(f, "INSERT"),
            ChangeOperation::Update => write!(f, "UPDATE"),
            ChangeOperation::Delete => write!(f, "DELETE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_status_roundtrip_and_transitions() {
        assert_eq!(PlanStatus::from_str("released"), Some(PlanStatus::Released));
        assert_eq!(PlanStatus::Active.to_db_str(), "ACTIVE");
        assert!(PlanStatus::Draft.can_transition_to(PlanStatus::Released));
        assert!(!PlanStatus::Draft.can_transition_to(PlanStatus::Active));
        assert!(!PlanStatus::Completed.can_transition_to(PlanStatus::Cancelled));
    }

    #[test]
    fn test_relation_endpoints() {
        assert_eq!(
            RelationType::NodePredecessor.endpoints(),
            (EntityType::PlanNode, EntityType::PlanNode)
        );
        assert_eq!(RelationType::from_str("node_station"), Some(RelationType::NodeStation));
        assert_eq!(RelationType::from_str("unknown"), None);
    }

    #[test]
    fn test_assignment_status_terminal() {
        assert!(AssignmentStatus::Completed.is_terminal());
        assert!(AssignmentStatus::Cancelled.is_terminal());
        assert!(!AssignmentStatus::Started.is_terminal());
    }
}
