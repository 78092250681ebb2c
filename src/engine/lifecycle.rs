// ==========================================
// 车间生产执行调度系统 - 工单生命周期状态机
// ==========================================
// 流转: PENDING → ASSIGNED → STARTED → COMPLETED
//       PENDING/ASSIGNED/STARTED → CANCELLED
//       ASSIGNED → PENDING（撤回派工）
// 副作用（只生成台账动作, 由仓储与工单行同事务落库）:
// - 开工: 预留全部投入物料（按计划产出量缩放）, 失败则保持 ASSIGNED
// - 完工: 按效率折算消耗预留, 产出入库
// - 取消: 释放未消耗的预留, 已消耗部分不回滚
// ==========================================

use crate::domain::assignment::{AssignmentEvent, ConsumedMaterial, ReservedMaterial, WorkerAssignment};
use crate::domain::types::{AssignmentStatus, MaterialReservationStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{consumption_quantity, Consumption, LedgerEffects, PlannedReservation};
use chrono::NaiveDateTime;
use uuid::Uuid;

/// 校验事件在当前状态下是否合法, 返回目标状态
pub fn check_transition(from: AssignmentStatus, event: &AssignmentEvent) -> EngineResult<AssignmentStatus> {
    use AssignmentStatus::*;
    let allowed = match event {
        AssignmentEvent::Assign { .. } => from == Pending,
        AssignmentEvent::Unassign => from == Assigned,
        AssignmentEvent::Start => from == Assigned,
        AssignmentEvent::Complete { .. } => from == Started,
        AssignmentEvent::Cancel { .. } => matches!(from, Pending | Assigned | Started),
    };
    if !allowed {
        return Err(EngineError::invalid_transition(
            from,
            event.name(),
            format!("{} 状态下不允许 {}", from, event.name()),
        ));
    }
    Ok(event.target_status())
}

/// 迁移上下文
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub now: NaiveDateTime,
    /// 该人员是否已有其他进行中的工单
    pub worker_busy: bool,
}

/// 迁移结果: 目标工单行与需同事务落库的台账动作
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub next: WorkerAssignment,
    pub effects: LedgerEffects,
}

// ==========================================
// AssignmentLifecycle - 生命周期引擎
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentLifecycle;

impl AssignmentLifecycle {
    pub fn new() -> Self {
        Self
    }

    /// 计算事件的迁移结果（不触碰台账与数据库）
    ///
    /// 返回 Err 时没有任何待落库动作, 调用方保持原状态
    pub fn apply(
        &self,
        current: &WorkerAssignment,
        event: &AssignmentEvent,
        ctx: TransitionContext,
    ) -> EngineResult<TransitionOutcome> {
        let target = check_transition(current.status, event)?;
        let mut next = current.clone();
        next.status = target;
        next.updated_at = ctx.now;
        let mut effects = LedgerEffects::default();

        match event {
            AssignmentEvent::Assign { worker_id, station_id } => {
                next.worker_id = worker_id.or(current.worker_id);
                next.station_id = station_id.or(current.station_id);
                if next.worker_id.is_none() {
                    return Err(EngineError::invalid_transition(
                        current.status,
                        event.name(),
                        "派工需要指定人员",
                    ));
                }
            }
            AssignmentEvent::Unassign => {}
            AssignmentEvent::Start => {
                if current.worker_id.is_none() {
                    return Err(EngineError::invalid_transition(
                        current.status,
                        event.name(),
                        "工单未指定人员",
                    ));
                }
                if ctx.worker_busy {
                    return Err(EngineError::invalid_transition(
                        current.status,
                        event.name(),
                        "该人员已有进行中的工单",
                    ));
                }
                plan_reserve(&mut next, &mut effects);
                next.started_at = Some(ctx.now);
            }
            AssignmentEvent::Complete { actual_output } => {
                let actual = actual_output.unwrap_or(current.planned_output_quantity);
                if !(actual >= 0.0) {
                    return Err(EngineError::invalid_transition(
                        current.status,
                        event.name(),
                        format!("实际产出不能为负: {}", actual),
                    ));
                }
                plan_settle(&mut next, &mut effects, actual);
                next.actual_output_quantity = Some(actual);
                next.completed_at = Some(ctx.now);
                next.sequence_number = None;
            }
            AssignmentEvent::Cancel { reason } => {
                plan_release(&mut next, &mut effects);
                next.cancel_reason = reason.clone();
                next.sequence_number = None;
            }
        }

        tracing::debug!(
            assignment_id = current.assignment_id,
            event = event.name(),
            from = %current.status,
            to = %next.status,
            ledger_ops = !effects.is_empty(),
            "工单迁移已计算"
        );
        Ok(TransitionOutcome { next, effects })
    }
}

fn plan_reserve(next: &mut WorkerAssignment, effects: &mut LedgerEffects) {
    effects.reserve = next
        .materials_required
        .iter()
        .filter(|m| m.required_quantity > 0.0)
        .map(|m| PlannedReservation {
            reservation_id: Uuid::new_v4().to_string(),
            material_code: m.material_code.clone(),
            quantity: m.required_quantity,
        })
        .collect();
    if effects.reserve.is_empty() {
        return;
    }

    next.materials_reserved = effects
        .reserve
        .iter()
        .map(|r| ReservedMaterial {
            material_code: r.material_code.clone(),
            reservation_id: r.reservation_id.clone(),
            quantity: r.quantity,
        })
        .collect();
    next.material_reservation_status = MaterialReservationStatus::Reserved;
}

fn plan_settle(next: &mut WorkerAssignment, effects: &mut LedgerEffects, actual_output: f64) {
    let mut consumed = Vec::with_capacity(next.materials_reserved.len());
    for reserved in &next.materials_reserved {
        let quantity = next
            .materials_required
            .iter()
            .find(|m| m.material_code == reserved.material_code)
            .map(|m| consumption_quantity(m, actual_output, next.efficiency_override))
            .unwrap_or(reserved.quantity);
        effects.consume.push(Consumption {
            reservation_id: reserved.reservation_id.clone(),
            quantity,
        });
        consumed.push(ConsumedMaterial {
            material_code: reserved.material_code.clone(),
            quantity,
        });
    }

    effects.credit = next
        .output_material_code
        .clone()
        .filter(|_| actual_output > 0.0)
        .map(|code| (code, actual_output));

    if !consumed.is_empty() {
        next.material_reservation_status = MaterialReservationStatus::Consumed;
    }
    next.materials_consumed = consumed;
}

fn plan_release(next: &mut WorkerAssignment, effects: &mut LedgerEffects) {
    if next.material_reservation_status != MaterialReservationStatus::Reserved {
        return;
    }
    effects.release = next
        .materials_reserved
        .iter()
        .map(|r| r.reservation_id.clone())
        .collect();
    next.material_reservation_status = MaterialReservationStatus::Released;
}
