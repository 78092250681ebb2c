// ==========================================
// 车间生产执行调度系统 - 生产计划数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 节点行与其关系行（候选工位/子工位/前置节点）同事务写入
// ==========================================

pub(crate) mod node;
pub(crate) mod plan;

#[cfg(test)]
mod tests;

pub use node::PlanNodeRepository;
pub use plan::PlanRepository;
