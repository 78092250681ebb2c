// ==========================================
// 车间生产执行调度系统 - 关系与资源 API
// ==========================================
// 职责: 人员/工位/工序能力关系维护、人员日历维护
// 约定: 节点相关关系只能经由计划编制接口写入（需整图校验）
// ==========================================

use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::calendar::{ScheduleBlock, WorkerCalendar};
use crate::domain::change::ChangeEvent;
use crate::domain::relation::{EntityRef, RelationTarget};
use crate::domain::types::{ChangeOperation, EntityType, RelationType};
use crate::engine::events::{ChangePublisher, OptionalChangePublisher};
use crate::notify::payload_keys;
use crate::repository::{LinkOutcome, RelationRepository, WorkerCalendarRepository};

// ==========================================
// RelationApi - 关系维护 API
// ==========================================
pub struct RelationApi {
    relation_repo: Arc<RelationRepository>,
    calendar_repo: Arc<WorkerCalendarRepository>,
    publisher: OptionalChangePublisher,
}

impl RelationApi {
    /// 创建新的RelationApi实例
    pub fn new(
        relation_repo: Arc<RelationRepository>,
        calendar_repo: Arc<WorkerCalendarRepository>,
        publisher: Option<Arc<dyn ChangePublisher>>,
    ) -> Self {
        let publisher = match publisher {
            Some(p) => OptionalChangePublisher::with_publisher(p),
            None => OptionalChangePublisher::none(),
        };
        Self {
            relation_repo,
            calendar_repo,
            publisher,
        }
    }

    // ==========================================
    // 通用关系接口
    // ==========================================

    /// 建立关系（幂等）
    ///
    /// # 返回
    /// - Ok(LinkOutcome): 新建或已存在
    /// - Err(DuplicateRelation): 同键关系已存在且优先级不同
    pub fn link(
        &self,
        source: EntityRef,
        relation_type: RelationType,
        target: EntityRef,
        priority: Option<i32>,
    ) -> ApiResult<LinkOutcome> {
        reject_node_relation(relation_type)?;
        let outcome = self.relation_repo.link(source, relation_type, target, priority)?;
        if outcome.is_created() {
            self.publish_endpoints(source, target);
        }
        Ok(outcome)
    }

    /// 删除关系; 返回是否存在
    pub fn unlink(
        &self,
        source: EntityRef,
        relation_type: RelationType,
        target_id: i64,
    ) -> ApiResult<bool> {
        reject_node_relation(relation_type)?;
        let removed = self.relation_repo.unlink(source, relation_type, target_id)?;
        if removed {
            let (_, target_type) = relation_type.endpoints();
            self.publish_endpoints(source, EntityRef::new(target_type, target_id));
        }
        Ok(removed)
    }

    /// 正向查询
    pub fn query(&self, source: EntityRef, relation_type: RelationType) -> ApiResult<Vec<RelationTarget>> {
        Ok(self.relation_repo.query(source, relation_type)?)
    }

    /// 反向查询（影响分析）
    pub fn reverse(&self, relation_type: RelationType, target_id: i64) -> ApiResult<Vec<EntityRef>> {
        Ok(self.relation_repo.reverse(relation_type, target_id)?)
    }

    /// 资源退役: 清理其全部关系并发布删除事件
    pub fn retire(&self, entity: EntityRef) -> ApiResult<usize> {
        if entity.entity_type == EntityType::PlanNode {
            return Err(ApiError::BusinessRuleViolation(
                "节点请通过计划编制接口删除".to_string(),
            ));
        }
        let removed = self.relation_repo.purge_entity(entity)?;
        self.publisher.publish(entity_changed(entity, ChangeOperation::Delete, &[]));
        Ok(removed)
    }

    // ==========================================
    // 能力矩阵
    // ==========================================

    pub fn link_worker_to_station(&self, worker_id: i64, station_id: i64) -> ApiResult<LinkOutcome> {
        self.link(
            EntityRef::worker(worker_id),
            RelationType::WorkerStation,
            EntityRef::station(station_id),
            None,
        )
    }

    pub fn unlink_worker_from_station(&self, worker_id: i64, station_id: i64) -> ApiResult<bool> {
        self.unlink(EntityRef::worker(worker_id), RelationType::WorkerStation, station_id)
    }

    pub fn link_worker_to_operation(&self, worker_id: i64, operation_id: i64) -> ApiResult<LinkOutcome> {
        self.link(
            EntityRef::worker(worker_id),
            RelationType::WorkerOperation,
            EntityRef::operation(operation_id),
            None,
        )
    }

    pub fn link_station_to_operation(&self, station_id: i64, operation_id: i64) -> ApiResult<LinkOutcome> {
        self.link(
            EntityRef::station(station_id),
            RelationType::StationOperation,
            EntityRef::operation(operation_id),
            None,
        )
    }

    pub fn workers_for_station(&self, station_id: i64) -> ApiResult<Vec<i64>> {
        Ok(self.relation_repo.workers_for_station(station_id)?)
    }

    pub fn stations_for_worker(&self, worker_id: i64) -> ApiResult<Vec<i64>> {
        Ok(self.relation_repo.stations_for_worker(worker_id)?)
    }

    /// 具备工序资质的人员
    pub fn workers_qualified_for(&self, operation_id: i64) -> ApiResult<Vec<i64>> {
        Ok(self.relation_repo.workers_qualified_for(operation_id)?)
    }

    // ==========================================
    // 人员日历
    // ==========================================

    /// 替换人员某个星期几的时段
    pub fn set_worker_day(&self, worker_id: i64, weekday: u32, blocks: &[ScheduleBlock]) -> ApiResult<()> {
        self.calendar_repo.replace_day(worker_id, weekday, blocks)?;
        self.publisher.publish(entity_changed(
            EntityRef::worker(worker_id),
            ChangeOperation::Update,
            &["calendar"],
        ));
        Ok(())
    }

    /// 覆盖保存整份周历
    pub fn save_worker_calendar(&self, calendar: &WorkerCalendar) -> ApiResult<()> {
        self.calendar_repo.save_calendar(calendar)?;
        self.publisher.publish(entity_changed(
            EntityRef::worker(calendar.worker_id),
            ChangeOperation::Update,
            &["calendar"],
        ));
        Ok(())
    }

    pub fn worker_calendar(&self, worker_id: i64) -> ApiResult<WorkerCalendar> {
        Ok(self.calendar_repo.load_for_worker(worker_id)?)
    }

    fn publish_endpoints(&self, source: EntityRef, target: EntityRef) {
        for entity in [source, target] {
            if matches!(entity.entity_type, EntityType::Worker | EntityType::Station) {
                self.publisher
                    .publish(entity_changed(entity, ChangeOperation::Update, &["relations"]));
            }
        }
    }
}

fn reject_node_relation(relation_type: RelationType) -> ApiResult<()> {
    let (source, target) = relation_type.endpoints();
    if source == EntityType::PlanNode || target == EntityType::PlanNode {
        return Err(ApiError::BusinessRuleViolation(format!(
            "{} 关系请通过计划编制接口维护",
            relation_type
        )));
    }
    Ok(())
}

fn entity_changed(entity: EntityRef, operation: ChangeOperation, fields: &[&str]) -> ChangeEvent {
    let event = ChangeEvent::new(entity.entity_type, entity.id, operation)
        .with_fields(fields.iter().copied());
    match entity.entity_type {
        EntityType::Worker => event.with_payload(payload_keys::WORKER_ID, entity.id),
        EntityType::Station => event.with_payload(payload_keys::STATION_ID, entity.id),
        _ => event,
    }
}
