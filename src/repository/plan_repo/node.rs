use crate::domain::plan::{MaterialInput, NewPlanNode, PlanNode};
use crate::domain::relation::EntityRef;
use crate::domain::types::{AssignmentMode, RelationType, SchedulingMode};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::relation_repo::sql as relation_sql;
use crate::repository::row_utils::{enum_err, get_json, to_json};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const NODE_COLUMNS: &str = r#"node_id, plan_id, operation_id, name, nominal_time_min, efficiency,
    assignment_mode, assigned_worker_id, scheduling_mode, urgent, sequence_order, unit_count,
    output_material_code, output_quantity, material_inputs_json"#;

// ==========================================
// PlanNodeRepository - 计划节点仓储
// ==========================================
// 节点的候选工位/子工位/前置节点存放于 entity_relation
pub struct PlanNodeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PlanNodeRepository {
    /// 创建新的PlanNodeRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入节点及其全部关系
    ///
    /// # 红线
    /// - 节点行、候选工位、子工位、前置节点在同一事务内写入
    /// - 任一关系写入失败则整体回滚
    pub fn insert_with_relations(&self, plan_id: i64, node: &NewPlanNode) -> RepositoryResult<PlanNode> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO plan_node (
                plan_id, operation_id, name, nominal_time_min, efficiency,
                assignment_mode, assigned_worker_id, scheduling_mode, urgent,
                sequence_order, unit_count, output_material_code, output_quantity,
                material_inputs_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
            params![
                plan_id,
                node.operation_id,
                node.name,
                node.nominal_time_min,
                node.efficiency,
                node.assignment_mode.to_db_str(),
                node.assigned_worker_id,
                node.scheduling_mode.to_db_str(),
                node.urgent,
                node.sequence_order,
                node.unit_count,
                node.output_material_code,
                node.output_quantity,
                to_json("material_inputs", &node.material_inputs)?,
            ],
        )?;
        let node_id = tx.last_insert_rowid();
        let source = EntityRef::node(node_id);

        for candidate in &node.candidate_stations {
            relation_sql::link(
                &tx,
                source,
                RelationType::NodeStation,
                EntityRef::station(candidate.station_id),
                Some(candidate.priority),
            )?;
        }
        for substation_id in &node.required_substations {
            relation_sql::link(
                &tx,
                source,
                RelationType::NodeSubstation,
                EntityRef::substation(*substation_id),
                None,
            )?;
        }
        for predecessor_id in &node.predecessors {
            ensure_same_plan(&tx, plan_id, *predecessor_id)?;
            relation_sql::link(
                &tx,
                source,
                RelationType::NodePredecessor,
                EntityRef::node(*predecessor_id),
                None,
            )?;
        }

        tx.commit()?;

        tracing::debug!(
            plan_id,
            node_id,
            stations = node.candidate_stations.len(),
            predecessors = node.predecessors.len(),
            "节点已写入"
        );

        let mut created = node.clone().into_node(node_id, plan_id);
        created.candidate_stations = created.stations_by_priority();
        created.predecessors.sort_unstable();
        created.predecessors.dedup();
        Ok(created)
    }

    /// 按ID查询节点（含关系）
    pub fn find_by_id(&self, node_id: i64) -> RepositoryResult<Option<PlanNode>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM plan_node WHERE node_id = ?1", NODE_COLUMNS);
        let node = conn.query_row(&sql, params![node_id], map_node_row).optional()?;
        match node {
            Some(mut node) => {
                load_relations(&conn, &mut node)?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// 按ID查询节点, 不存在时返回 NotFound
    pub fn get(&self, node_id: i64) -> RepositoryResult<PlanNode> {
        self.find_by_id(node_id)?
            .ok_or_else(|| RepositoryError::not_found("PlanNode", node_id))
    }

    /// 列出计划的全部节点（含关系, 按 node_id 排序）
    pub fn list_by_plan(&self, plan_id: i64) -> RepositoryResult<Vec<PlanNode>> {
        let conn = self.get_conn()?;
        list_plan_nodes(&conn, plan_id)
    }

    /// 整体替换节点的前置节点集合（事务内）
    pub fn set_predecessors(&self, node_id: i64, predecessors: &[i64]) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let plan_id: i64 = tx
            .query_row(
                "SELECT plan_id FROM plan_node WHERE node_id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RepositoryError::not_found("PlanNode", node_id))?;

        let mut targets = Vec::with_capacity(predecessors.len());
        for predecessor_id in predecessors {
            ensure_same_plan(&tx, plan_id, *predecessor_id)?;
            targets.push((EntityRef::node(*predecessor_id), None));
        }
        targets.sort();
        targets.dedup();

        relation_sql::replace_targets(&tx, EntityRef::node(node_id), RelationType::NodePredecessor, &targets)?;
        tx.commit()?;
        Ok(())
    }

    /// 删除节点并级联清理其关系行
    ///
    /// # 返回
    /// - `Ok(true)`: 已删除
    /// - `Ok(false)`: 节点不存在
    pub fn delete_with_relations(&self, node_id: i64) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let removed_relations = relation_sql::purge_entity(&tx, EntityRef::node(node_id))?;
        let affected = tx.execute("DELETE FROM plan_node WHERE node_id = ?1", params![node_id])?;
        tx.commit()?;

        tracing::debug!(node_id, removed_relations, deleted = affected > 0, "节点删除");
        Ok(affected > 0)
    }
}

/// 在给定连接上列出计划节点（供跨仓储事务复用）
pub(crate) fn list_plan_nodes(conn: &Connection, plan_id: i64) -> RepositoryResult<Vec<PlanNode>> {
    let sql = format!(
        "SELECT {} FROM plan_node WHERE plan_id = ?1 ORDER BY node_id",
        NODE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut nodes = stmt
        .query_map(params![plan_id], map_node_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for node in nodes.iter_mut() {
        load_relations(conn, node)?;
    }
    Ok(nodes)
}

/// 前置节点必须存在且属于同一计划
fn ensure_same_plan(conn: &Connection, plan_id: i64, predecessor_id: i64) -> RepositoryResult<()> {
    let owner: Option<i64> = conn
        .query_row(
            "SELECT plan_id FROM plan_node WHERE node_id = ?1",
            params![predecessor_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        Some(p) if p == plan_id => Ok(()),
        Some(p) => Err(RepositoryError::ValidationError(format!(
            "前置节点 {} 属于计划 {}, 不属于计划 {}",
            predecessor_id, p, plan_id
        ))),
        None => Err(RepositoryError::not_found("PlanNode", predecessor_id)),
    }
}

fn load_relations(conn: &Connection, node: &mut PlanNode) -> RepositoryResult<()> {
    let source = EntityRef::node(node.node_id);
    node.candidate_stations = relation_sql::load_candidate_stations(conn, node.node_id)?;
    node.required_substations = relation_sql::query(conn, source, RelationType::NodeSubstation)?
        .into_iter()
        .map(|t| t.target_id)
        .collect();
    node.predecessors = relation_sql::query(conn, source, RelationType::NodePredecessor)?
        .into_iter()
        .map(|t| t.target_id)
        .collect();
    Ok(())
}

fn map_node_row(row: &rusqlite::Row) -> rusqlite::Result<PlanNode> {
    let assignment_mode: String = row.get(6)?;
    let scheduling_mode: String = row.get(8)?;
    let material_inputs: Vec<MaterialInput> = get_json(row, 14)?;
    Ok(PlanNode {
        node_id: row.get(0)?,
        plan_id: row.get(1)?,
        operation_id: row.get(2)?,
        name: row.get(3)?,
        nominal_time_min: row.get(4)?,
        efficiency: row.get(5)?,
        assignment_mode: AssignmentMode::from_str(&assignment_mode)
            .ok_or_else(|| enum_err(6, &assignment_mode))?,
        assigned_worker_id: row.get(7)?,
        scheduling_mode: SchedulingMode::from_str(&scheduling_mode)
            .ok_or_else(|| enum_err(8, &scheduling_mode))?,
        urgent: row.get(9)?,
        sequence_order: row.get(10)?,
        unit_count: row.get(11)?,
        output_material_code: row.get(12)?,
        output_quantity: row.get(13)?,
        candidate_stations: Vec::new(),
        required_substations: Vec::new(),
        predecessors: Vec::new(),
        material_inputs,
    })
}
