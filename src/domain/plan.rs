// ==========================================
// 车间生产执行调度系统 - 生产计划领域模型
// ==========================================
// 职责: ProductionPlan / PlanNode 及其创建参数
// 红线: 有效工时为派生值, 不作为权威数据存储
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{AssignmentMode, PlanStatus, SchedulingMode};

// ==========================================
// ProductionPlan - 生产计划
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionPlan {
    pub plan_id: i64,                          // 计划ID
    pub code: String,                          // 计划编码 (PP-2026-0001)
    pub name: String,                          // 计划名称
    pub status: PlanStatus,                    // 状态
    pub target_quantity: f64,                  // 目标产量
    pub default_efficiency: f64,               // 默认效率 (0, 1]
    pub planned_start: Option<NaiveDateTime>,  // 计划开工时间（排程锚点）
    pub created_by: String,                    // 创建人
    pub created_at: NaiveDateTime,             // 创建时间
    pub updated_at: NaiveDateTime,             // 更新时间
    pub released_at: Option<NaiveDateTime>,    // 下达时间
    pub launched_at: Option<NaiveDateTime>,    // 投产时间
    pub completed_at: Option<NaiveDateTime>,   // 完成/取消时间
}

impl ProductionPlan {
    /// 是否允许编辑节点（仅草稿）
    pub fn is_editable(&self) -> bool {
        self.status == PlanStatus::Draft
    }
}

// ==========================================
// MaterialInput - 节点物料需求
// ==========================================
// quantity 为单位产出的投入量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialInput {
    pub material_code: String,
    pub quantity: f64,
    /// 是否来自前序节点的产出（半成品）
    pub from_prior_node: bool,
}

// ==========================================
// StationCandidate - 候选工位
// ==========================================
// priority 越小越优先
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCandidate {
    pub station_id: i64,
    pub priority: i32,
}

// ==========================================
// PlanNode - 计划节点（工序）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    // ===== 标识 =====
    pub node_id: i64,
    pub plan_id: i64,
    pub operation_id: i64,
    pub name: String,

    // ===== 工时 =====
    pub nominal_time_min: f64,      // 标准工时（分钟）
    pub efficiency: Option<f64>,    // 效率覆盖值；None 时回落到计划默认值

    // ===== 派工 =====
    pub assignment_mode: AssignmentMode,
    pub assigned_worker_id: Option<i64>,
    pub scheduling_mode: SchedulingMode,
    pub urgent: bool,
    pub sequence_order: i32,        // 排序提示（拓扑序并列时使用）
    pub unit_count: u32,            // 拆分单元数（>= 1）

    // ===== 产出 =====
    pub output_material_code: Option<String>,
    pub output_quantity: f64,

    // ===== 关系（来自 entity_relation） =====
    pub candidate_stations: Vec<StationCandidate>,
    pub required_substations: Vec<i64>,
    pub predecessors: Vec<i64>,

    // ===== 物料 =====
    pub material_inputs: Vec<MaterialInput>,
}

impl PlanNode {
    /// 解析生效效率: 节点覆盖值 → 计划默认值 → 1.0
    pub fn resolved_efficiency(&self, plan_default: Option<f64>) -> f64 {
        self.efficiency.or(plan_default).unwrap_or(1.0)
    }

    /// 有效工时（分钟）= 标准工时 / 效率
    pub fn effective_time_min(&self, plan_default: Option<f64>) -> f64 {
        self.nominal_time_min / self.resolved_efficiency(plan_default)
    }

    /// 候选工位按优先级排序（并列按工位ID）
    pub fn stations_by_priority(&self) -> Vec<StationCandidate> {
        let mut stations = self.candidate_stations.clone();
        stations.sort_by_key(|c| (c.priority, c.station_id));
        stations
    }
}

// ==========================================
// 创建参数
// ==========================================

/// 新建计划参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlan {
    /// 为空时由序列服务分配
    pub code: Option<String>,
    pub name: String,
    pub target_quantity: f64,
    /// 为空时使用配置 schedule.default_efficiency
    pub default_efficiency: Option<f64>,
    pub planned_start: Option<NaiveDateTime>,
    pub created_by: String,
}

/// 新建节点参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlanNode {
    pub operation_id: i64,
    pub name: String,
    pub nominal_time_min: f64,
    pub efficiency: Option<f64>,
    pub assignment_mode: AssignmentMode,
    pub assigned_worker_id: Option<i64>,
    pub scheduling_mode: SchedulingMode,
    pub urgent: bool,
    pub sequence_order: i32,
    pub unit_count: u32,
    pub output_material_code: Option<String>,
    pub output_quantity: f64,
    pub candidate_stations: Vec<StationCandidate>,
    pub required_substations: Vec<i64>,
    pub predecessors: Vec<i64>,
    pub material_inputs: Vec<MaterialInput>,
}

impl NewPlanNode {
    /// 最小参数构造（自动派工, FIFO, 单单元）
    pub fn new(operation_id: i64, name: impl Into<String>, nominal_time_min: f64) -> Self {
        Self {
            operation_id,
            name: name.into(),
            nominal_time_min,
            efficiency: None,
            assignment_mode: AssignmentMode::Auto,
            assigned_worker_id: None,
            scheduling_mode: SchedulingMode::Fifo,
            urgent: false,
            sequence_order: 0,
            unit_count: 1,
            output_material_code: None,
            output_quantity: 1.0,
            candidate_stations: Vec::new(),
            required_substations: Vec::new(),
            predecessors: Vec::new(),
            material_inputs: Vec::new(),
        }
    }

    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = Some(efficiency);
        self
    }

    pub fn with_station(mut self, station_id: i64, priority: i32) -> Self {
        self.candidate_stations.push(StationCandidate { station_id, priority });
        self
    }

    pub fn with_substation(mut self, substation_id: i64) -> Self {
        self.required_substations.push(substation_id);
        self
    }

    pub fn with_predecessor(mut self, node_id: i64) -> Self {
        self.predecessors.push(node_id);
        self
    }

    pub fn with_manual_worker(mut self, worker_id: i64) -> Self {
        self.assignment_mode = AssignmentMode::Manual;
        self.assigned_worker_id = Some(worker_id);
        self
    }

    pub fn with_input(mut self, material_code: impl Into<String>, quantity: f64, from_prior_node: bool) -> Self {
        self.material_inputs.push(MaterialInput {
            material_code: material_code.into(),
            quantity,
            from_prior_node,
        });
        self
    }

    pub fn with_output(mut self, material_code: impl Into<String>, quantity: f64) -> Self {
        self.output_material_code = Some(material_code.into());
        self.output_quantity = quantity;
        self
    }

    pub fn with_priority_queue(mut self, urgent: bool) -> Self {
        self.scheduling_mode = SchedulingMode::Priority;
        self.urgent = urgent;
        self
    }

    pub fn with_sequence_order(mut self, order: i32) -> Self {
        self.sequence_order = order;
        self
    }

    pub fn with_units(mut self, unit_count: u32) -> Self {
        self.unit_count = unit_count;
        self
    }

    /// 物化为 PlanNode（node_id 由仓储分配）
    pub fn into_node(self, node_id: i64, plan_id: i64) -> PlanNode {
        PlanNode {
            node_id,
            plan_id,
            operation_id: self.operation_id,
            name: self.name,
            nominal_time_min: self.nominal_time_min,
            efficiency: self.efficiency,
            assignment_mode: self.assignment_mode,
            assigned_worker_id: self.assigned_worker_id,
            scheduling_mode: self.scheduling_mode,
            urgent: self.urgent,
            sequence_order: self.sequence_order,
            unit_count: self.unit_count,
            output_material_code: self.output_material_code,
            output_quantity: self.output_quantity,
            candidate_stations: self.candidate_stations,
            required_substations: self.required_substations,
            predecessors: self.predecessors,
            material_inputs: self.material_inputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_time_with_override() {
        let node = NewPlanNode::new(1, "A", 60.0).with_efficiency(0.85).into_node(1, 1);
        let eff = node.effective_time_min(Some(1.0));
        assert!((eff - 70.588).abs() < 0.01);
    }

    #[test]
    fn test_effective_time_falls_back_to_plan_default() {
        let node = NewPlanNode::new(1, "B", 60.0).into_node(2, 1);
        assert!((node.effective_time_min(Some(0.9)) - 66.667).abs() < 0.01);
        assert!((node.effective_time_min(None) - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stations_by_priority() {
        let node = NewPlanNode::new(1, "C", 10.0)
            .with_station(30, 2)
            .with_station(10, 1)
            .with_station(20, 1)
            .into_node(3, 1);
        let ids: Vec<i64> = node.stations_by_priority().iter().map(|c| c.station_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }
}
