use super::*;

use crate::domain::assignment::AssignmentEvent;
use crate::engine::lifecycle::TransitionContext;
use crate::engine::queue::{KeyedLockGuard, QueueKey};
use crate::repository::RepositoryError;

impl ProductionApi {
    // ==========================================
    // 工单状态迁移
    // ==========================================

    /// 执行工单事件
    ///
    /// # 说明
    /// - 台账动作与工单行同事务提交; 迁移非法、物料不足或落库失败时返回错误, 工单与台账保持原状态
    /// - 提交后重排涉及人员的队列; 计划全部终结时自动完成计划
    /// - 提交后的步骤失败只记录错误, 仍返回 Ok
    pub fn transition(&self, assignment_id: i64, event: AssignmentEvent) -> ApiResult<WorkerAssignment> {
        self.apply_event(assignment_id, event, true)
    }

    pub(super) fn apply_event(
        &self,
        assignment_id: i64,
        event: AssignmentEvent,
        auto_complete_plan: bool,
    ) -> ApiResult<WorkerAssignment> {
        let (current, guard) = self.lock_assignment(assignment_id, &event)?;

        let now = self.now();
        let worker_busy = match (&event, current.worker_id) {
            (AssignmentEvent::Start, Some(w)) => {
                self.assignment_repo.has_started_for_worker(w, assignment_id)?
            }
            _ => false,
        };

        let outcome = self
            .lifecycle
            .apply(&current, &event, TransitionContext { now, worker_busy })?;
        if let Err(e) = self.assignment_repo.commit_transition(&outcome.next, &outcome.effects) {
            tracing::warn!(assignment_id, event = event.name(), error = %e, "工单迁移未生效");
            return Err(e.into());
        }
        let next = outcome.next;
        tracing::info!(
            assignment_id,
            event = event.name(),
            from = %current.status,
            to = %next.status,
            "工单状态迁移"
        );

        let workers: BTreeSet<i64> = current.worker_id.into_iter().chain(next.worker_id).collect();
        self.resequence_committed(&workers, now);
        drop(guard);

        let completed_plan = if auto_complete_plan && next.status.is_terminal() {
            self.complete_plan_if_finished(next.plan_id, now)
                .unwrap_or_else(|e| {
                    tracing::error!(plan_id = next.plan_id, error = %e, "计划自动完成检查失败");
                    None
                })
        } else {
            None
        };

        let updated = self.assignment_repo.get(assignment_id).unwrap_or_else(|e| {
            tracing::error!(assignment_id, error = %e, "重新读取工单失败, 返回提交时的工单");
            next
        });
        self.publisher.publish(assignment_changed(
            &updated,
            ChangeOperation::Update,
            &["status"],
        ));
        self.publish_worker_queues(&workers);
        if let Some(plan) = completed_plan {
            self.publisher.publish(plan_changed(&plan, ChangeOperation::Update));
        }
        Ok(updated)
    }

    /// 锁定工单涉及的队列键后重新读取工单
    ///
    /// 等锁期间工单人员/工位若被改派, 按新键重新加锁
    fn lock_assignment(
        &self,
        assignment_id: i64,
        event: &AssignmentEvent,
    ) -> ApiResult<(WorkerAssignment, KeyedLockGuard)> {
        let mut snapshot = self.assignment_repo.get(assignment_id)?;
        loop {
            let keys = transition_keys(&snapshot, event);
            let guard = self.locks.acquire(keys.iter().copied())?;
            let current = self.assignment_repo.get(assignment_id)?;
            if transition_keys(&current, event).is_subset(&keys) {
                return Ok((current, guard));
            }
            drop(guard);
            snapshot = current;
        }
    }

    /// 计划下全部工单终结且至少一个完工时 ACTIVE → COMPLETED
    fn complete_plan_if_finished(
        &self,
        plan_id: i64,
        now: NaiveDateTime,
    ) -> ApiResult<Option<ProductionPlan>> {
        let progress = self.assignment_repo.plan_progress(plan_id)?;
        if !progress.is_finished() {
            return Ok(None);
        }
        match self
            .plan_repo
            .update_status(plan_id, PlanStatus::Active, PlanStatus::Completed, now)
        {
            Ok(()) => {
                tracing::info!(plan_id, completed = progress.completed, "计划已完成");
                Ok(Some(self.plan_repo.get(plan_id)?))
            }
            // 计划已不在 ACTIVE（并发完成或已取消）
            Err(RepositoryError::InvalidStateTransition { from, .. }) => {
                tracing::debug!(plan_id, from = %from, "计划未处于执行中, 跳过自动完成");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn transition_keys(a: &WorkerAssignment, event: &AssignmentEvent) -> BTreeSet<QueueKey> {
    let mut keys: BTreeSet<QueueKey> = QueueKey::for_assignment(a).into_iter().collect();
    if let AssignmentEvent::Assign { worker_id, station_id } = event {
        keys.extend(worker_id.map(QueueKey::Worker));
        keys.extend(station_id.map(QueueKey::Station));
    }
    keys
}
