// ==========================================
// 车间生产执行调度系统 - 排程引擎
// ==========================================
// 职责: 按拓扑序将节点展开为工单草案
//       有效工时 → 最早可开工 → 日历吸附 → 预计完工 → 更新队尾
// 红线: 纯计算, 不写库; 队尾来自调用方提供的上下文
// ==========================================

use crate::domain::assignment::{AssignmentDraft, MaterialRequirement, WorkerAssignment};
use crate::domain::calendar::CalendarProvider;
use crate::domain::plan::{PlanNode, ProductionPlan, StationCandidate};
use crate::domain::types::AssignmentMode;
use crate::engine::calendar::{end_after, snap_to_work, DEFAULT_SNAP_HORIZON_DAYS};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::graph;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::instrument;

// ==========================================
// ScheduleContext - 排程上下文
// ==========================================
// 各人员/工位/子工位的当前队尾, 以及工位可用人员
#[derive(Debug, Clone)]
pub struct ScheduleContext {
    /// 不早于此刻开工（通常为当前时间）
    pub not_before: NaiveDateTime,
    pub worker_tails: HashMap<i64, NaiveDateTime>,
    pub station_tails: HashMap<i64, NaiveDateTime>,
    pub substation_tails: HashMap<i64, NaiveDateTime>,
    /// 工位 → 关联人员（自动派工候选）
    pub station_workers: HashMap<i64, Vec<i64>>,
}

impl ScheduleContext {
    pub fn new(not_before: NaiveDateTime) -> Self {
        Self {
            not_before,
            worker_tails: HashMap::new(),
            station_tails: HashMap::new(),
            substation_tails: HashMap::new(),
            station_workers: HashMap::new(),
        }
    }

    pub fn with_station_workers(mut self, station_id: i64, workers: Vec<i64>) -> Self {
        self.station_workers.insert(station_id, workers);
        self
    }

    /// 以已存在的非终态工单初始化队尾
    ///
    /// 队尾取 estimated_end 与 optimized_end 的较晚者, 不早于投产时按依赖排出的完工
    pub fn absorb(&mut self, assignments: &[WorkerAssignment]) {
        for a in assignments.iter().filter(|a| a.is_queued()) {
            let Some(end) = a.estimated_end.max(a.optimized_end) else {
                continue;
            };
            if let Some(w) = a.worker_id {
                push_tail(&mut self.worker_tails, w, end);
            }
            if let Some(s) = a.station_id {
                push_tail(&mut self.station_tails, s, end);
            }
            for sub in &a.substation_ids {
                push_tail(&mut self.substation_tails, *sub, end);
            }
        }
    }
}

fn push_tail(tails: &mut HashMap<i64, NaiveDateTime>, key: i64, end: NaiveDateTime) {
    let entry = tails.entry(key).or_insert(end);
    if end > *entry {
        *entry = end;
    }
}

fn tail_of(tails: &HashMap<i64, NaiveDateTime>, key: i64, floor: NaiveDateTime) -> NaiveDateTime {
    tails.get(&key).copied().map_or(floor, |t| t.max(floor))
}

// ==========================================
// SchedulingEngine - 排程引擎
// ==========================================
pub struct SchedulingEngine {
    snap_horizon_days: u32,
}

impl Default for SchedulingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingEngine {
    pub fn new() -> Self {
        Self {
            snap_horizon_days: DEFAULT_SNAP_HORIZON_DAYS,
        }
    }

    pub fn with_snap_horizon(snap_horizon_days: u32) -> Self {
        Self { snap_horizon_days }
    }

    /// 计算计划的工单草案
    ///
    /// # 参数
    /// - `plan`: 计划（提供默认效率与计划开工时间）
    /// - `nodes`: 计划全部节点（含关系）
    /// - `calendars`: 人员日历
    /// - `ctx`: 当前队尾（不修改调用方副本）
    ///
    /// # 返回
    /// - `Ok(drafts)`: 按拓扑序、单元序排列
    /// - `Err(CyclicDependency / Validation)`: 图无效, 未做任何排程
    /// - `Err(UnschedulableNode)`: AUTO 节点没有候选工位, 或有效工时超出时间范围
    #[instrument(skip_all, fields(plan_id = plan.plan_id, nodes = nodes.len()))]
    pub fn schedule(
        &self,
        plan: &ProductionPlan,
        nodes: &[PlanNode],
        calendars: &dyn CalendarProvider,
        ctx: &ScheduleContext,
    ) -> EngineResult<Vec<AssignmentDraft>> {
        graph::validate(nodes).map_err(EngineError::from_validation_errors)?;
        let order = graph::topological_order(nodes)?;

        let by_id: HashMap<i64, &PlanNode> = nodes.iter().map(|n| (n.node_id, n)).collect();
        let floor = plan
            .planned_start
            .map_or(ctx.not_before, |p| p.max(ctx.not_before));

        let mut tails = ctx.clone();
        let mut node_end: HashMap<i64, NaiveDateTime> = HashMap::new();
        let mut drafts = Vec::new();

        for node_id in order {
            let Some(node) = by_id.get(&node_id).copied() else {
                continue;
            };

            let stations = node.stations_by_priority();
            if stations.is_empty() && node.assignment_mode == AssignmentMode::Auto {
                tracing::warn!(node_id, "AUTO 节点没有候选工位");
                return Err(EngineError::UnschedulableNode {
                    node_id,
                    reason: "自动派工节点没有候选工位".to_string(),
                });
            }

            let effective = node.effective_time_min(Some(plan.default_efficiency));
            let units = node.unit_count.max(1);
            let unit_output = node.output_quantity / f64::from(units);
            let materials: Vec<MaterialRequirement> = node
                .material_inputs
                .iter()
                .map(|m| MaterialRequirement {
                    material_code: m.material_code.clone(),
                    quantity_per_unit: m.quantity,
                    required_quantity: m.quantity * unit_output,
                    from_prior_node: m.from_prior_node,
                })
                .collect();

            let deps_done = node
                .predecessors
                .iter()
                .filter_map(|p| node_end.get(p).copied())
                .fold(floor, NaiveDateTime::max);

            let mut latest_end = deps_done;
            for unit_index in 1..=units {
                let station = pick_station(&stations, &tails.station_tails, deps_done);
                let worker = match node.assignment_mode {
                    AssignmentMode::Manual => node.assigned_worker_id,
                    AssignmentMode::Auto => station.and_then(|s| pick_worker(&tails, s, deps_done)),
                };

                let mut earliest = deps_done;
                if let Some(w) = worker {
                    earliest = earliest.max(tail_of(&tails.worker_tails, w, floor));
                }
                if let Some(s) = station {
                    earliest = earliest.max(tail_of(&tails.station_tails, s, floor));
                }
                for sub in &node.required_substations {
                    earliest = earliest.max(tail_of(&tails.substation_tails, *sub, floor));
                }

                let start = snap_to_work(calendars, worker, earliest, self.snap_horizon_days);
                let end = end_after(start, effective).ok_or_else(|| {
                    tracing::warn!(node_id, effective_min = effective, %start, "有效工时超出可排程范围");
                    EngineError::UnschedulableNode {
                        node_id,
                        reason: format!("有效工时 {} 分钟超出可排程的时间范围", effective),
                    }
                })?;

                if let Some(w) = worker {
                    push_tail(&mut tails.worker_tails, w, end);
                }
                if let Some(s) = station {
                    push_tail(&mut tails.station_tails, s, end);
                }
                for sub in &node.required_substations {
                    push_tail(&mut tails.substation_tails, *sub, end);
                }
                latest_end = latest_end.max(end);

                tracing::debug!(
                    node_id,
                    unit_index,
                    worker_id = ?worker,
                    station_id = ?station,
                    %start,
                    %end,
                    effective_min = effective,
                    "节点单元已排程"
                );

                drafts.push(AssignmentDraft {
                    node_id,
                    unit_index,
                    worker_id: worker,
                    station_id: station,
                    substation_ids: node.required_substations.clone(),
                    scheduling_mode: node.scheduling_mode,
                    urgent: node.urgent,
                    nominal_time_min: node.nominal_time_min,
                    effective_time_min: effective,
                    planned_output_quantity: unit_output,
                    materials_required: materials.clone(),
                    estimated_start: start,
                    estimated_end: end,
                    auto_confirmed: node.assignment_mode == AssignmentMode::Auto && worker.is_some(),
                });
            }
            node_end.insert(node_id, latest_end);
        }

        tracing::info!(plan_id = plan.plan_id, drafts = drafts.len(), "排程完成");
        Ok(drafts)
    }
}

/// 工位回退: 队尾最早者优先, 并列按优先级（stations 已按优先级排序）
fn pick_station(
    stations: &[StationCandidate],
    station_tails: &HashMap<i64, NaiveDateTime>,
    floor: NaiveDateTime,
) -> Option<i64> {
    let mut best: Option<(NaiveDateTime, i64)> = None;
    for c in stations {
        let tail = tail_of(station_tails, c.station_id, floor);
        match best {
            Some((t, _)) if t <= tail => {}
            _ => best = Some((tail, c.station_id)),
        }
    }
    best.map(|(_, id)| id)
}

/// 自动派工: 工位关联人员中队尾最早者, 并列按人员ID
fn pick_worker(ctx: &ScheduleContext, station_id: i64, floor: NaiveDateTime) -> Option<i64> {
    ctx.station_workers
        .get(&station_id)?
        .iter()
        .map(|w| (tail_of(&ctx.worker_tails, *w, floor), *w))
        .min()
        .map(|(_, w)| w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::WorkerCalendars;
    use crate::domain::plan::NewPlanNode;
    use crate::domain::types::PlanStatus;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn plan(default_efficiency: f64) -> ProductionPlan {
        ProductionPlan {
            plan_id: 1,
            code: "PP-2026-0001".to_string(),
            name: "test".to_string(),
            status: PlanStatus::Released,
            target_quantity: 1.0,
            default_efficiency,
            planned_start: None,
            created_by: "tester".to_string(),
            created_at: t0(),
            updated_at: t0(),
            released_at: None,
            launched_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_station_fallback_prefers_earliest_tail() {
        let nodes = vec![NewPlanNode::new(1, "A", 60.0)
            .with_station(10, 1)
            .with_station(20, 2)
            .into_node(1, 1)];
        let mut ctx = ScheduleContext::new(t0());
        ctx.station_tails.insert(10, t0() + chrono::Duration::hours(3));

        let drafts = SchedulingEngine::new()
            .schedule(&plan(1.0), &nodes, &WorkerCalendars::new(), &ctx)
            .unwrap();
        assert_eq!(drafts[0].station_id, Some(20));
        assert_eq!(drafts[0].estimated_start, t0());
    }

    #[test]
    fn test_station_tie_uses_priority() {
        let nodes = vec![NewPlanNode::new(1, "A", 60.0)
            .with_station(20, 2)
            .with_station(10, 1)
            .into_node(1, 1)];
        let drafts = SchedulingEngine::new()
            .schedule(&plan(1.0), &nodes, &WorkerCalendars::new(), &ScheduleContext::new(t0()))
            .unwrap();
        assert_eq!(drafts[0].station_id, Some(10));
    }

    #[test]
    fn test_auto_node_without_station_is_unschedulable() {
        let nodes = vec![NewPlanNode::new(1, "A", 60.0).into_node(1, 1)];
        let err = SchedulingEngine::new()
            .schedule(&plan(1.0), &nodes, &WorkerCalendars::new(), &ScheduleContext::new(t0()))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnschedulableNode { node_id: 1, .. }));
    }

    #[test]
    fn test_manual_node_without_station_is_scheduled() {
        let nodes = vec![NewPlanNode::new(1, "A", 30.0)
            .with_manual_worker(5)
            .into_node(1, 1)];
        let drafts = SchedulingEngine::new()
            .schedule(&plan(1.0), &nodes, &WorkerCalendars::new(), &ScheduleContext::new(t0()))
            .unwrap();
        assert_eq!(drafts[0].worker_id, Some(5));
        assert_eq!(drafts[0].station_id, None);
        assert!(!drafts[0].auto_confirmed);
    }

    #[test]
    fn test_auto_worker_selection_and_units() {
        let nodes = vec![NewPlanNode::new(1, "A", 60.0)
            .with_station(10, 1)
            .with_units(2)
            .with_output("PART", 10.0)
            .with_input("STEEL", 2.0, false)
            .into_node(1, 1)];
        let ctx = ScheduleContext::new(t0()).with_station_workers(10, vec![3, 2]);

        let drafts = SchedulingEngine::new()
            .schedule(&plan(1.0), &nodes, &WorkerCalendars::new(), &ctx)
            .unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].worker_id, Some(2));
        assert!(drafts[0].auto_confirmed);
        // 工位被第一个单元占用, 第二个单元排在其后
        assert_eq!(drafts[1].estimated_start, drafts[0].estimated_end);
        assert!((drafts[0].planned_output_quantity - 5.0).abs() < 1e-9);
        assert!((drafts[0].materials_required[0].required_quantity - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_cycle_blocks_scheduling() {
        let mut a = NewPlanNode::new(1, "A", 10.0).with_station(10, 1).into_node(1, 1);
        let mut b = NewPlanNode::new(1, "B", 10.0).with_station(10, 1).into_node(2, 1);
        a.predecessors = vec![2];
        b.predecessors = vec![1];
        let err = SchedulingEngine::new()
            .schedule(&plan(1.0), &[a, b], &WorkerCalendars::new(), &ScheduleContext::new(t0()))
            .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency { .. }));
    }

    #[test]
    fn test_tiny_efficiency_is_unschedulable() {
        let nodes = vec![NewPlanNode::new(1, "A", 60.0)
            .with_station(10, 1)
            .with_efficiency(1e-300)
            .into_node(1, 1)];
        let err = SchedulingEngine::new()
            .schedule(&plan(1.0), &nodes, &WorkerCalendars::new(), &ScheduleContext::new(t0()))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnschedulableNode { node_id: 1, .. }));
    }

    #[test]
    fn test_absorb_keeps_later_of_estimated_and_optimized_end() {
        use crate::domain::types::{AssignmentStatus, MaterialReservationStatus, SchedulingMode};
        let at = |h| t0() + chrono::Duration::hours(h);
        let queued = WorkerAssignment {
            assignment_id: 1,
            code: "WP-1".to_string(),
            plan_id: 1,
            node_id: 1,
            unit_index: 1,
            worker_id: Some(2),
            station_id: Some(20),
            substation_ids: vec![30],
            status: AssignmentStatus::Assigned,
            scheduling_mode: SchedulingMode::Fifo,
            urgent: false,
            sequence_number: Some(1),
            nominal_time_min: 60.0,
            effective_time_min: 60.0,
            efficiency_override: None,
            planned_output_quantity: 1.0,
            actual_output_quantity: None,
            output_material_code: None,
            materials_required: Vec::new(),
            materials_reserved: Vec::new(),
            materials_consumed: Vec::new(),
            material_reservation_status: MaterialReservationStatus::None,
            // 等待前置完工, 预计 09:00-10:00
            estimated_start: Some(at(1)),
            estimated_end: Some(at(2)),
            optimized_start: Some(t0()),
            optimized_end: Some(at(1)),
            started_at: None,
            completed_at: None,
            cancel_reason: None,
            created_at: t0(),
            updated_at: t0(),
        };

        let mut ctx = ScheduleContext::new(t0());
        ctx.absorb(&[queued]);
        assert_eq!(ctx.worker_tails.get(&2), Some(&at(2)));
        assert_eq!(ctx.station_tails.get(&20), Some(&at(2)));
        assert_eq!(ctx.substation_tails.get(&30), Some(&at(2)));
    }
}
