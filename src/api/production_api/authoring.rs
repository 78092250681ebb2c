use super::*;

use chrono::Datelike;

use crate::domain::plan::{NewPlan, NewPlanNode, PlanNode};
use crate::domain::types::AssignmentMode;
use crate::domain::AssignmentEvent;
use crate::engine::error::EngineError;
use crate::engine::graph::{self, is_valid_efficiency};

impl ProductionApi {
    // ==========================================
    // 计划编制
    // ==========================================

    /// 创建计划（DRAFT）
    ///
    /// # 参数
    /// - req.code 为空时由序列服务分配 PP-{年}-{序号}
    /// - req.default_efficiency 为空时使用配置 schedule.default_efficiency
    pub fn create_plan(&self, req: NewPlan) -> ApiResult<ProductionPlan> {
        if req.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("计划名称不能为空".to_string()));
        }
        if req.created_by.trim().is_empty() {
            return Err(ApiError::InvalidInput("创建人不能为空".to_string()));
        }
        if !(req.target_quantity > 0.0) {
            return Err(ApiError::InvalidInput(format!(
                "目标产量必须大于0, 实际 {}",
                req.target_quantity
            )));
        }

        let default_efficiency = req
            .default_efficiency
            .unwrap_or(self.config.default_efficiency);
        if !is_valid_efficiency(default_efficiency) {
            return Err(ApiError::InvalidInput(format!(
                "默认效率必须在 (0, 1] 内, 实际 {}",
                default_efficiency
            )));
        }

        let now = self.now();
        let code = match req.code.filter(|c| !c.trim().is_empty()) {
            Some(c) => c,
            None => self.sequence_repo.next_plan_code(now.year())?,
        };

        let mut plan = ProductionPlan {
            plan_id: 0,
            code,
            name: req.name,
            status: PlanStatus::Draft,
            target_quantity: req.target_quantity,
            default_efficiency,
            planned_start: req.planned_start,
            created_by: req.created_by,
            created_at: now,
            updated_at: now,
            released_at: None,
            launched_at: None,
            completed_at: None,
        };
        plan.plan_id = self.plan_repo.create(&plan)?;

        tracing::info!(plan_id = plan.plan_id, code = %plan.code, "计划已创建");
        self.publisher.publish(plan_changed(&plan, ChangeOperation::Insert));
        Ok(plan)
    }

    /// 按配置默认排队模式构造节点参数
    pub fn new_node(&self, operation_id: i64, name: &str, nominal_time_min: f64) -> NewPlanNode {
        let mut node = NewPlanNode::new(operation_id, name, nominal_time_min);
        node.scheduling_mode = self.config.default_scheduling_mode;
        node
    }

    /// 新增节点（仅 DRAFT）
    ///
    /// 节点行与其候选工位/子工位/前置关系在同一事务内写入
    pub fn add_node(&self, plan_id: i64, node: NewPlanNode) -> ApiResult<PlanNode> {
        let plan = self.plan_repo.get(plan_id)?;
        self.ensure_editable(&plan, "ADD_NODE")?;

        if node.assignment_mode == AssignmentMode::Manual && node.assigned_worker_id.is_none() {
            return Err(ApiError::InvalidInput(format!(
                "手动派工节点 {} 必须指定人员",
                node.name
            )));
        }

        // 以占位ID参与整图校验（自增ID从1开始）
        let mut nodes = self.node_repo.list_by_plan(plan_id)?;
        nodes.push(node.clone().into_node(0, plan_id));
        graph::validate(&nodes).map_err(EngineError::from_validation_errors)?;

        let created = self.node_repo.insert_with_relations(plan_id, &node)?;
        self.publisher.publish(node_changed(
            plan_id,
            created.node_id,
            ChangeOperation::Insert,
            &[],
        ));
        Ok(created)
    }

    /// 替换节点的前置集合（仅 DRAFT）
    ///
    /// 以变更后的整图校验, 成环则拒绝且不写入
    pub fn set_predecessors(&self, node_id: i64, predecessors: Vec<i64>) -> ApiResult<PlanNode> {
        let node = self.node_repo.get(node_id)?;
        let plan = self.plan_repo.get(node.plan_id)?;
        self.ensure_editable(&plan, "SET_PREDECESSORS")?;

        let mut nodes = self.node_repo.list_by_plan(plan.plan_id)?;
        for n in nodes.iter_mut().filter(|n| n.node_id == node_id) {
            n.predecessors = predecessors.clone();
        }
        graph::validate(&nodes).map_err(EngineError::from_validation_errors)?;

        self.node_repo.set_predecessors(node_id, &predecessors)?;
        self.publisher.publish(node_changed(
            plan.plan_id,
            node_id,
            ChangeOperation::Update,
            &["predecessors"],
        ));
        Ok(self.node_repo.get(node_id)?)
    }

    /// 删除节点（仅 DRAFT）, 级联清理指向它的关系
    pub fn remove_node(&self, node_id: i64) -> ApiResult<()> {
        let node = self.node_repo.get(node_id)?;
        let plan = self.plan_repo.get(node.plan_id)?;
        self.ensure_editable(&plan, "REMOVE_NODE")?;

        self.node_repo.delete_with_relations(node_id)?;
        self.publisher.publish(node_changed(
            plan.plan_id,
            node_id,
            ChangeOperation::Delete,
            &[],
        ));
        Ok(())
    }

    // ==========================================
    // 校验与计划状态
    // ==========================================

    /// 校验计划图
    ///
    /// # 返回
    /// - Err(CyclicDependency): 存在环（优先于其他问题报告）
    /// - Err(PlanValidationFailed): 其他结构问题
    pub fn validate_plan(&self, plan_id: i64) -> ApiResult<()> {
        self.plan_repo.get(plan_id)?;
        let nodes = self.node_repo.list_by_plan(plan_id)?;
        graph::validate(&nodes).map_err(EngineError::from_validation_errors)?;
        Ok(())
    }

    /// 下达计划 DRAFT → RELEASED（要求图有效且非空）
    pub fn release_plan(&self, plan_id: i64) -> ApiResult<ProductionPlan> {
        let plan = self.plan_repo.get(plan_id)?;
        ensure_plan_transition(&plan, PlanStatus::Released)?;

        let nodes = self.node_repo.list_by_plan(plan_id)?;
        if nodes.is_empty() {
            return Err(ApiError::InvalidInput(format!("计划 {} 没有节点", plan.code)));
        }
        graph::validate(&nodes).map_err(EngineError::from_validation_errors)?;

        self.plan_repo
            .update_status(plan_id, PlanStatus::Draft, PlanStatus::Released, self.now())?;
        let plan = self.plan_repo.get(plan_id)?;
        tracing::info!(plan_id, code = %plan.code, "计划已下达");
        self.publisher.publish(plan_changed(&plan, ChangeOperation::Update));
        Ok(plan)
    }

    /// 取消计划: 取消全部未终结工单（释放预留）, 计划置为 CANCELLED
    pub fn cancel_plan(&self, plan_id: i64, reason: Option<String>) -> ApiResult<ProductionPlan> {
        let plan = self.plan_repo.get(plan_id)?;
        ensure_plan_transition(&plan, PlanStatus::Cancelled)?;

        let open: Vec<i64> = self
            .assignment_repo
            .list_by_plan(plan_id)?
            .into_iter()
            .filter(|a| a.is_queued())
            .map(|a| a.assignment_id)
            .collect();
        for assignment_id in &open {
            self.apply_event(
                *assignment_id,
                AssignmentEvent::Cancel {
                    reason: reason.clone(),
                },
                false,
            )?;
        }

        self.plan_repo
            .update_status(plan_id, plan.status, PlanStatus::Cancelled, self.now())?;
        let plan = self.plan_repo.get(plan_id)?;
        tracing::info!(plan_id, cancelled_assignments = open.len(), "计划已取消");
        self.publisher.publish(plan_changed(&plan, ChangeOperation::Update));
        Ok(plan)
    }
}
