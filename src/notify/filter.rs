// ==========================================
// 车间生产执行调度系统 - 订阅过滤器
// ==========================================
// 职责: 发布时按订阅者条件筛选事件
// 说明: 条件之间为"且"关系; 未设置的条件不限制
// ==========================================

use crate::domain::change::ChangeEvent;
use crate::domain::types::EntityType;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// 载荷字段名（与 ChangeEvent.payload 一致）
pub mod payload_keys {
    pub const WORKER_ID: &str = "workerId";
    pub const STATION_ID: &str = "stationId";
    pub const PLAN_ID: &str = "planId";
    pub const NODE_ID: &str = "nodeId";
    pub const STATUS: &str = "status";
    pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
}

/// 订阅过滤器
#[derive(Clone, Default)]
pub struct SubscriptionFilter {
    entity_types: Option<HashSet<EntityType>>,
    payload_equals: Vec<(String, Value)>,
    predicate: Option<Predicate>,
}

impl SubscriptionFilter {
    /// 不过滤
    pub fn all() -> Self {
        Self::default()
    }

    /// 仅 payload.workerId == worker_id 的事件
    pub fn for_worker(worker_id: i64) -> Self {
        Self::all().with_payload(payload_keys::WORKER_ID, worker_id)
    }

    /// 仅 payload.stationId == station_id 的事件
    pub fn for_station(station_id: i64) -> Self {
        Self::all().with_payload(payload_keys::STATION_ID, station_id)
    }

    /// 仅 payload.planId == plan_id 的事件
    pub fn for_plan(plan_id: i64) -> Self {
        Self::all().with_payload(payload_keys::PLAN_ID, plan_id)
    }

    /// 限定实体类型（可多次调用, 取并集）
    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_types
            .get_or_insert_with(HashSet::new)
            .insert(entity_type);
        self
    }

    /// 载荷字段等值条件
    pub fn with_payload(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload_equals.push((key.to_string(), value.into()));
        self
    }

    /// 自定义条件
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// 事件是否满足全部条件
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(types) = &self.entity_types {
            if !types.contains(&event.entity_type) {
                return false;
            }
        }
        // 载荷缺少该字段视为不匹配
        let payload_ok = self
            .payload_equals
            .iter()
            .all(|(key, expected)| event.payload.get(key) == Some(expected));
        if !payload_ok {
            return false;
        }
        self.predicate.as_ref().map_or(true, |p| p(event))
    }
}

impl fmt::Debug for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionFilter")
            .field("entity_types", &self.entity_types)
            .field("payload_equals", &self.payload_equals)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ChangeOperation;

    fn assignment_event(worker_id: i64) -> ChangeEvent {
        ChangeEvent::new(EntityType::Assignment, 1, ChangeOperation::Update)
            .with_payload(payload_keys::WORKER_ID, worker_id)
    }

    #[test]
    fn test_worker_filter() {
        let filter = SubscriptionFilter::for_worker(7);
        assert!(filter.matches(&assignment_event(7)));
        assert!(!filter.matches(&assignment_event(8)));
        // 无 workerId 的事件不匹配
        assert!(!filter.matches(&ChangeEvent::new(EntityType::Plan, 1, ChangeOperation::Update)));
    }

    #[test]
    fn test_entity_type_and_predicate() {
        let filter = SubscriptionFilter::all()
            .with_entity_type(EntityType::Assignment)
            .with_entity_type(EntityType::Worker)
            .with_predicate(|e| e.operation != ChangeOperation::Delete);

        assert!(filter.matches(&assignment_event(1)));
        assert!(!filter.matches(&ChangeEvent::new(EntityType::Plan, 1, ChangeOperation::Update)));
        assert!(!filter.matches(&ChangeEvent::new(EntityType::Worker, 1, ChangeOperation::Delete)));
        assert!(SubscriptionFilter::all().matches(&assignment_event(3)));
    }
}
