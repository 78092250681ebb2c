use super::*;

use crate::domain::assignment::AssignmentDraft;
use crate::domain::plan::PlanNode;
use crate::domain::types::{AssignmentMode, AssignmentStatus, MaterialReservationStatus};
use crate::engine::queue::QueueKey;
use crate::engine::scheduler::ScheduleContext;

impl ProductionApi {
    // ==========================================
    // 排程与投产
    // ==========================================

    /// 排程预览（不写库）
    ///
    /// 以当前全部未终结工单的队尾为起点计算草案
    pub fn schedule_plan(&self, plan_id: i64) -> ApiResult<Vec<AssignmentDraft>> {
        let plan = self.plan_repo.get(plan_id)?;
        let nodes = self.node_repo.list_by_plan(plan_id)?;
        let station_workers = self.station_workers(&nodes)?;
        let ctx = self.schedule_context(self.now(), &station_workers)?;
        let calendars = self.load_calendars()?;

        Ok(self.engine.schedule(&plan, &nodes, &calendars, &ctx)?)
    }

    /// 投产 RELEASED → ACTIVE
    ///
    /// 在涉及的人员/工位/子工位键锁内: 读取队尾 → 排程 → 原子写入工单 → 重排人员队列
    /// 工单写入提交后重排失败只记录错误, 投产仍视为成功
    #[tracing::instrument(skip(self))]
    pub fn launch_plan(&self, plan_id: i64) -> ApiResult<Vec<WorkerAssignment>> {
        let plan = self.plan_repo.get(plan_id)?;
        ensure_plan_transition(&plan, PlanStatus::Active)?;

        let nodes = self.node_repo.list_by_plan(plan_id)?;
        let station_workers = self.station_workers(&nodes)?;
        let keys = launch_keys(&nodes, &station_workers);
        let guard = self.locks.acquire(keys)?;

        let now = self.now();
        let ctx = self.schedule_context(now, &station_workers)?;
        let calendars = self.load_calendars()?;
        let drafts = self.engine.schedule(&plan, &nodes, &calendars, &ctx)?;

        let node_by_id = index_by(&nodes, |n| n.node_id);
        let assignments: Vec<WorkerAssignment> = drafts
            .iter()
            .map(|d| materialize(d, node_by_id.get(&d.node_id).copied(), plan_id, now))
            .collect();

        let created = self.assignment_repo.launch(plan_id, &plan.code, assignments, now)?;
        let workers: BTreeSet<i64> = created.iter().filter_map(|a| a.worker_id).collect();
        self.resequence_committed(&workers, now);
        drop(guard);

        let launched = self.assignment_repo.list_by_plan(plan_id).unwrap_or_else(|e| {
            tracing::error!(plan_id, error = %e, "重新读取工单失败, 返回写入时的工单");
            created
        });
        tracing::info!(
            plan_id,
            assignments = launched.len(),
            workers = workers.len(),
            "计划已投产"
        );

        match self.plan_repo.get(plan_id) {
            Ok(plan) => {
                self.publisher.publish(plan_changed(&plan, ChangeOperation::Update));
            }
            Err(e) => tracing::error!(plan_id, error = %e, "重新读取计划失败, 跳过计划变更发布"),
        }
        self.publisher.publish_all(
            launched
                .iter()
                .map(|a| assignment_changed(a, ChangeOperation::Insert, &[])),
        );
        self.publish_worker_queues(&workers);
        Ok(launched)
    }

    /// 候选工位 → 关联人员
    fn station_workers(&self, nodes: &[PlanNode]) -> ApiResult<HashMap<i64, Vec<i64>>> {
        let mut map = HashMap::new();
        for station_id in nodes
            .iter()
            .flat_map(|n| n.candidate_stations.iter().map(|c| c.station_id))
        {
            if !map.contains_key(&station_id) {
                map.insert(station_id, self.relation_repo.workers_for_station(station_id)?);
            }
        }
        Ok(map)
    }

    fn schedule_context(
        &self,
        now: NaiveDateTime,
        station_workers: &HashMap<i64, Vec<i64>>,
    ) -> ApiResult<ScheduleContext> {
        let mut ctx = ScheduleContext::new(now);
        ctx.absorb(&self.assignment_repo.list_open()?);
        ctx.station_workers = station_workers.clone();
        Ok(ctx)
    }
}

/// 投产可能触及的全部队列键
fn launch_keys(nodes: &[PlanNode], station_workers: &HashMap<i64, Vec<i64>>) -> BTreeSet<QueueKey> {
    let mut keys = BTreeSet::new();
    for node in nodes {
        if node.assignment_mode == AssignmentMode::Manual {
            keys.extend(node.assigned_worker_id.map(QueueKey::Worker));
        }
        for c in &node.candidate_stations {
            keys.insert(QueueKey::Station(c.station_id));
            if node.assignment_mode == AssignmentMode::Auto {
                let workers = station_workers.get(&c.station_id).into_iter().flatten();
                keys.extend(workers.map(|w| QueueKey::Worker(*w)));
            }
        }
        keys.extend(node.required_substations.iter().map(|s| QueueKey::Substation(*s)));
    }
    keys
}

/// 草案物化为工单; 自动派工且已解析人员的直接确认为 ASSIGNED
fn materialize(
    draft: &AssignmentDraft,
    node: Option<&PlanNode>,
    plan_id: i64,
    now: NaiveDateTime,
) -> WorkerAssignment {
    let status = if draft.auto_confirmed {
        AssignmentStatus::Assigned
    } else {
        AssignmentStatus::Pending
    };

    WorkerAssignment {
        assignment_id: 0,
        code: String::new(),
        plan_id,
        node_id: draft.node_id,
        unit_index: draft.unit_index,
        worker_id: draft.worker_id,
        station_id: draft.station_id,
        substation_ids: draft.substation_ids.clone(),
        status,
        scheduling_mode: draft.scheduling_mode,
        urgent: draft.urgent,
        sequence_number: None,
        nominal_time_min: draft.nominal_time_min,
        effective_time_min: draft.effective_time_min,
        efficiency_override: node.and_then(|n| n.efficiency),
        planned_output_quantity: draft.planned_output_quantity,
        actual_output_quantity: None,
        output_material_code: node.and_then(|n| n.output_material_code.clone()),
        materials_required: draft.materials_required.clone(),
        materials_reserved: Vec::new(),
        materials_consumed: Vec::new(),
        material_reservation_status: MaterialReservationStatus::None,
        estimated_start: Some(draft.estimated_start),
        estimated_end: Some(draft.estimated_end),
        optimized_start: None,
        optimized_end: None,
        started_at: None,
        completed_at: None,
        cancel_reason: None,
        created_at: now,
        updated_at: now,
    }
}
