// ==========================================
// 车间生产执行调度系统 - 通用关系仓储
// ==========================================
// 职责: 以一张 entity_relation 表承载六类关联
//       (人员-工位 / 人员-工序 / 工位-工序 / 节点-工位 / 节点-子工位 / 节点-前置节点)
// 红线: 唯一键 (source_type, source_id, relation_type, target_id)
// 红线: 级联清理由实体所有方负责, 仓储只提供 purge 入口
// ==========================================

mod core;
pub(crate) mod sql;
mod typed;

#[cfg(test)]
mod tests;

pub use core::{LinkOutcome, RelationRepository};
