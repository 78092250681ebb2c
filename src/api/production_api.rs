// ==========================================
// 车间生产执行调度系统 - 生产执行 API
// ==========================================
// 职责: 计划编制、校验、排程预览、投产、工单状态迁移、变更订阅
// 约定:
// - 校验/排程错误在任何写入之前返回
// - 队列变更在对应人员/工位/子工位键锁内完成
// - 状态写入提交后再重排队列; 重排失败只记录错误, 不回报调用方
// - 每次成功写入后发布变更事件
// ==========================================

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::api::error::{ApiError, ApiResult};
use crate::config::ExecutionConfig;
use crate::domain::assignment::WorkerAssignment;
use crate::domain::calendar::WorkerCalendars;
use crate::domain::change::ChangeEvent;
use crate::domain::plan::ProductionPlan;
use crate::domain::types::{ChangeOperation, EntityType, PlanStatus};
use crate::engine::events::{ChangePublisher, OptionalChangePublisher};
use crate::engine::lifecycle::AssignmentLifecycle;
use crate::engine::queue::{compact_queue, KeyedLocks, QueuePosition};
use crate::engine::scheduler::SchedulingEngine;
use crate::notify::{payload_keys, NotificationBus, Subscription, SubscriptionFilter};
use crate::repository::{
    AssignmentRepository, CodeSequenceRepository, PlanNodeRepository, PlanRepository,
    RelationRepository, WorkerCalendarRepository,
};

mod authoring;
mod launch;
mod transition;

#[cfg(test)]
mod tests;

/// 当前时间来源
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

// ==========================================
// ProductionApi - 生产执行 API
// ==========================================
pub struct ProductionApi {
    plan_repo: Arc<PlanRepository>,
    node_repo: Arc<PlanNodeRepository>,
    assignment_repo: Arc<AssignmentRepository>,
    relation_repo: Arc<RelationRepository>,
    calendar_repo: Arc<WorkerCalendarRepository>,
    sequence_repo: Arc<CodeSequenceRepository>,
    lifecycle: AssignmentLifecycle,
    engine: SchedulingEngine,
    locks: KeyedLocks,
    config: ExecutionConfig,
    bus: NotificationBus,
    publisher: OptionalChangePublisher,
    clock: Clock,
}

impl ProductionApi {
    /// 创建新的ProductionApi实例
    ///
    /// 默认直接向 `bus` 发布变更; 若总线由外部变更来源驱动, 用 `with_publisher` 替换
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan_repo: Arc<PlanRepository>,
        node_repo: Arc<PlanNodeRepository>,
        assignment_repo: Arc<AssignmentRepository>,
        relation_repo: Arc<RelationRepository>,
        calendar_repo: Arc<WorkerCalendarRepository>,
        sequence_repo: Arc<CodeSequenceRepository>,
        config: ExecutionConfig,
        bus: NotificationBus,
    ) -> Self {
        let publisher = OptionalChangePublisher::with_publisher(Arc::new(bus.clone()));
        Self {
            plan_repo,
            node_repo,
            assignment_repo,
            relation_repo,
            calendar_repo,
            sequence_repo,
            lifecycle: AssignmentLifecycle::new(),
            engine: SchedulingEngine::with_snap_horizon(config.snap_horizon_days),
            locks: KeyedLocks::new(),
            config,
            bus,
            publisher,
            clock: Arc::new(local_now),
        }
    }

    /// 替换变更发布者
    pub fn with_publisher(mut self, publisher: Arc<dyn ChangePublisher>) -> Self {
        self.publisher = OptionalChangePublisher::with_publisher(publisher);
        self
    }

    /// 替换时间来源
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    // ==========================================
    // 查询与订阅
    // ==========================================

    pub fn get_plan(&self, plan_id: i64) -> ApiResult<ProductionPlan> {
        Ok(self.plan_repo.get(plan_id)?)
    }

    pub fn get_assignment(&self, assignment_id: i64) -> ApiResult<WorkerAssignment> {
        Ok(self.assignment_repo.get(assignment_id)?)
    }

    /// 计划的全部工单
    pub fn list_assignments(&self, plan_id: i64) -> ApiResult<Vec<WorkerAssignment>> {
        Ok(self.assignment_repo.list_by_plan(plan_id)?)
    }

    /// 人员当前队列（按序号）
    pub fn worker_queue(&self, worker_id: i64) -> ApiResult<Vec<WorkerAssignment>> {
        let mut queue = self.assignment_repo.list_open_by_worker(worker_id)?;
        queue.sort_by_key(|a| (a.sequence_number.unwrap_or(i32::MAX), a.assignment_id));
        Ok(queue)
    }

    /// 订阅变更
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.bus.subscribe(filter)
    }

    pub fn unsubscribe(&self, subscriber_id: u64) -> bool {
        self.bus.unsubscribe(subscriber_id)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn load_calendars(&self) -> ApiResult<WorkerCalendars> {
        Ok(self.calendar_repo.load_all()?)
    }

    /// 重排人员队列并写回序号与优化时间
    fn resequence_worker(
        &self,
        worker_id: i64,
        now: NaiveDateTime,
        calendars: &WorkerCalendars,
    ) -> ApiResult<Vec<QueuePosition>> {
        let open = self.assignment_repo.list_open_by_worker(worker_id)?;
        let positions = compact_queue(&open, worker_id, now, calendars, self.config.snap_horizon_days)?;
        self.assignment_repo.apply_queue_positions(&positions)?;
        tracing::debug!(worker_id, queued = positions.len(), "人员队列已重排");
        Ok(positions)
    }

    /// 状态已提交后重排涉及人员的队列
    ///
    /// 失败只记录错误: 已提交的状态不回滚, 序号与优化时间在该人员下一次重排时修正
    fn resequence_committed(&self, workers: &BTreeSet<i64>, now: NaiveDateTime) {
        if workers.is_empty() {
            return;
        }
        let calendars = match self.load_calendars() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(workers = ?workers, error = %e, "加载人员日历失败, 跳过队列重排");
                return;
            }
        };
        for w in workers {
            if let Err(e) = self.resequence_worker(*w, now, &calendars) {
                tracing::error!(worker_id = *w, error = %e, "人员队列重排失败");
            }
        }
    }

    fn ensure_editable(&self, plan: &ProductionPlan, action: &str) -> ApiResult<()> {
        if plan.is_editable() {
            return Ok(());
        }
        Err(ApiError::InvalidTransition {
            from: plan.status.to_string(),
            event: action.to_string(),
            reason: "仅草稿计划允许编辑节点".to_string(),
        })
    }

    fn publish_worker_queues(&self, workers: &BTreeSet<i64>) {
        for w in workers {
            self.publisher.publish(worker_queue_changed(*w));
        }
    }
}

// ==========================================
// 变更事件构造
// ==========================================

fn plan_changed(plan: &ProductionPlan, operation: ChangeOperation) -> ChangeEvent {
    ChangeEvent::new(EntityType::Plan, plan.plan_id, operation)
        .with_fields(["status"])
        .with_payload(payload_keys::PLAN_ID, plan.plan_id)
        .with_payload(payload_keys::STATUS, plan.status.to_db_str())
}

fn node_changed(plan_id: i64, node_id: i64, operation: ChangeOperation, fields: &[&str]) -> ChangeEvent {
    ChangeEvent::new(EntityType::PlanNode, node_id, operation)
        .with_fields(fields.iter().copied())
        .with_payload(payload_keys::PLAN_ID, plan_id)
        .with_payload(payload_keys::NODE_ID, node_id)
}

fn assignment_changed(a: &WorkerAssignment, operation: ChangeOperation, fields: &[&str]) -> ChangeEvent {
    ChangeEvent::new(EntityType::Assignment, a.assignment_id, operation)
        .with_fields(fields.iter().copied())
        .with_payload(payload_keys::PLAN_ID, a.plan_id)
        .with_payload(payload_keys::NODE_ID, a.node_id)
        .with_payload(payload_keys::WORKER_ID, a.worker_id)
        .with_payload(payload_keys::STATION_ID, a.station_id)
        .with_payload(payload_keys::STATUS, a.status.to_db_str())
        .with_payload(payload_keys::SEQUENCE_NUMBER, a.sequence_number)
}

fn worker_queue_changed(worker_id: i64) -> ChangeEvent {
    ChangeEvent::new(EntityType::Worker, worker_id, ChangeOperation::Update)
        .with_fields(["queue"])
        .with_payload(payload_keys::WORKER_ID, worker_id)
}

/// 按计划状态给出迁移事件名
fn plan_event_name(to: PlanStatus) -> &'static str {
    match to {
        PlanStatus::Draft => "REOPEN",
        PlanStatus::Released => "RELEASE",
        PlanStatus::Active => "LAUNCH",
        PlanStatus::Completed => "COMPLETE",
        PlanStatus::Cancelled => "CANCEL",
    }
}

/// 计划状态前置检查
fn ensure_plan_transition(plan: &ProductionPlan, to: PlanStatus) -> ApiResult<()> {
    if plan.status.can_transition_to(to) {
        return Ok(());
    }
    Err(ApiError::InvalidTransition {
        from: plan.status.to_string(),
        event: plan_event_name(to).to_string(),
        reason: format!("计划状态 {} 不允许迁移到 {}", plan.status, to),
    })
}

/// 节点 → 其值的索引
fn index_by<T, F>(items: &[T], key: F) -> HashMap<i64, &T>
where
    F: Fn(&T) -> i64,
{
    items.iter().map(|i| (key(i), i)).collect()
}
