// ==========================================
// 车间生产执行调度系统 - 带类型的关系辅助方法
// ==========================================
// 职责: 按实体类型封装通用关系表的读写
// ==========================================

use super::core::{LinkOutcome, RelationRepository};
use super::sql;
use crate::domain::plan::StationCandidate;
use crate::domain::relation::EntityRef;
use crate::domain::types::{EntityType, RelationType};
use crate::repository::error::RepositoryResult;

impl RelationRepository {
    // ===== 人员 / 工位 / 工序 能力矩阵 =====

    pub fn link_worker_to_station(&self, worker_id: i64, station_id: i64) -> RepositoryResult<LinkOutcome> {
        self.link(
            EntityRef::worker(worker_id),
            RelationType::WorkerStation,
            EntityRef::station(station_id),
            None,
        )
    }

    pub fn unlink_worker_from_station(&self, worker_id: i64, station_id: i64) -> RepositoryResult<bool> {
        self.unlink(EntityRef::worker(worker_id), RelationType::WorkerStation, station_id)
    }

    pub fn link_worker_to_operation(&self, worker_id: i64, operation_id: i64) -> RepositoryResult<LinkOutcome> {
        self.link(
            EntityRef::worker(worker_id),
            RelationType::WorkerOperation,
            EntityRef::operation(operation_id),
            None,
        )
    }

    pub fn link_station_to_operation(&self, station_id: i64, operation_id: i64) -> RepositoryResult<LinkOutcome> {
        self.link(
            EntityRef::station(station_id),
            RelationType::StationOperation,
            EntityRef::operation(operation_id),
            None,
        )
    }

    /// 工位上可作业的人员
    pub fn workers_for_station(&self, station_id: i64) -> RepositoryResult<Vec<i64>> {
        Ok(self
            .reverse(RelationType::WorkerStation, station_id)?
            .into_iter()
            .filter(|s| s.entity_type == EntityType::Worker)
            .map(|s| s.id)
            .collect())
    }

    /// 人员可作业的工位
    pub fn stations_for_worker(&self, worker_id: i64) -> RepositoryResult<Vec<i64>> {
        Ok(self
            .query(EntityRef::worker(worker_id), RelationType::WorkerStation)?
            .into_iter()
            .map(|t| t.target_id)
            .collect())
    }

    /// 具备某工序能力的工位
    pub fn stations_for_operation(&self, operation_id: i64) -> RepositoryResult<Vec<i64>> {
        Ok(self
            .reverse(RelationType::StationOperation, operation_id)?
            .into_iter()
            .filter(|s| s.entity_type == EntityType::Station)
            .map(|s| s.id)
            .collect())
    }

    /// 具备某工序资质的人员
    pub fn workers_qualified_for(&self, operation_id: i64) -> RepositoryResult<Vec<i64>> {
        Ok(self
            .reverse(RelationType::WorkerOperation, operation_id)?
            .into_iter()
            .filter(|s| s.entity_type == EntityType::Worker)
            .map(|s| s.id)
            .collect())
    }

    // ===== 计划图 =====

    pub fn link_node_to_station(&self, node_id: i64, station_id: i64, priority: i32) -> RepositoryResult<LinkOutcome> {
        self.link(
            EntityRef::node(node_id),
            RelationType::NodeStation,
            EntityRef::station(station_id),
            Some(priority),
        )
    }

    pub fn link_node_to_substation(&self, node_id: i64, substation_id: i64) -> RepositoryResult<LinkOutcome> {
        self.link(
            EntityRef::node(node_id),
            RelationType::NodeSubstation,
            EntityRef::substation(substation_id),
            None,
        )
    }

    pub fn link_node_to_predecessor(&self, node_id: i64, predecessor_id: i64) -> RepositoryResult<LinkOutcome> {
        self.link(
            EntityRef::node(node_id),
            RelationType::NodePredecessor,
            EntityRef::node(predecessor_id),
            None,
        )
    }

    /// 节点候选工位（按优先级）
    pub fn candidate_stations(&self, node_id: i64) -> RepositoryResult<Vec<StationCandidate>> {
        let conn = self.get_conn()?;
        sql::load_candidate_stations(&conn, node_id)
    }

    /// 节点前置节点
    pub fn predecessors_of(&self, node_id: i64) -> RepositoryResult<Vec<i64>> {
        Ok(self
            .query(EntityRef::node(node_id), RelationType::NodePredecessor)?
            .into_iter()
            .map(|t| t.target_id)
            .collect())
    }

    /// 节点后继节点
    pub fn successors_of(&self, node_id: i64) -> RepositoryResult<Vec<i64>> {
        Ok(self
            .reverse(RelationType::NodePredecessor, node_id)?
            .into_iter()
            .filter(|s| s.entity_type == EntityType::PlanNode)
            .map(|s| s.id)
            .collect())
    }
}
