// ==========================================
// 车间生产执行调度系统 - 通用实体关系
// ==========================================
// 职责: 多态关联行 (source, relation_type, target, priority)
// 红线: 关系行不携带优先级以外的业务数据
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{EntityType, RelationType};

/// 带类型标签的实体引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: i64,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: i64) -> Self {
        Self { entity_type, id }
    }

    pub fn worker(id: i64) -> Self {
        Self::new(EntityType::Worker, id)
    }

    pub fn station(id: i64) -> Self {
        Self::new(EntityType::Station, id)
    }

    pub fn substation(id: i64) -> Self {
        Self::new(EntityType::Substation, id)
    }

    pub fn operation(id: i64) -> Self {
        Self::new(EntityType::Operation, id)
    }

    pub fn node(id: i64) -> Self {
        Self::new(EntityType::PlanNode, id)
    }
}

// ==========================================
// EntityRelation - 关系行
// ==========================================
// 唯一键: (source_type, source_id, relation_type, target_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub relation_id: i64,
    pub source: EntityRef,
    pub relation_type: RelationType,
    pub target: EntityRef,
    pub priority: Option<i32>,
    pub created_at: NaiveDateTime,
}

/// 正向查询结果 (target_id, priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTarget {
    pub target_id: i64,
    pub priority: Option<i32>,
}
