// ==========================================
// 车间生产执行调度系统 - 工单数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: worker_assignment.node_id 为 plan_node 整型外键
// 红线: 投产（计划状态 + 工单批量写入 + 编码分配）在同一事务内完成
// 红线: 状态迁移（台账动作 + 工单行）在同一事务内完成
// ==========================================

use crate::domain::assignment::WorkerAssignment;
use crate::domain::types::{AssignmentStatus, MaterialReservationStatus, PlanStatus, SchedulingMode};
use crate::engine::ledger::LedgerEffects;
use crate::engine::queue::QueuePosition;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::material_ledger_repo::apply_effects_in;
use crate::repository::plan_repo::plan::update_plan_status;
use crate::repository::row_utils::{enum_err, fmt_opt_ts, fmt_ts, get_json, get_opt_ts, get_ts, to_json};
use crate::repository::sequence_repo::{allocate_in, format_work_package_code, work_package_scope};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const ASSIGNMENT_COLUMNS: &str = r#"assignment_id, code, plan_id, node_id, unit_index,
    worker_id, station_id, substation_ids_json, status, scheduling_mode, urgent, sequence_number,
    nominal_time_min, effective_time_min, efficiency_override,
    planned_output_quantity, actual_output_quantity, output_material_code,
    materials_required_json, materials_reserved_json, materials_consumed_json,
    material_reservation_status,
    estimated_start, estimated_end, optimized_start, optimized_end,
    started_at, completed_at, cancel_reason, created_at, updated_at"#;

const OPEN_STATUSES: &str = "('PENDING', 'ASSIGNED', 'STARTED')";

/// 计划工单进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanProgress {
    pub total: usize,
    pub open: usize,
    pub completed: usize,
}

impl PlanProgress {
    /// 全部终态且至少一个完工
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.open == 0 && self.completed > 0
    }
}

// ==========================================
// AssignmentRepository - 工单仓储
// ==========================================
pub struct AssignmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AssignmentRepository {
    /// 创建新的AssignmentRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 投产: 计划 RELEASED → ACTIVE 并批量写入工单
    ///
    /// # 参数
    /// - `plan_id` / `plan_code`: 计划标识（编码用于生成工作包编码）
    /// - `assignments`: 待写入工单（assignment_id/code 由本方法分配）
    ///
    /// # 红线
    /// - 必须在事务中完成, 任一失败整体回滚
    pub fn launch(
        &self,
        plan_id: i64,
        plan_code: &str,
        mut assignments: Vec<WorkerAssignment>,
        launched_at: NaiveDateTime,
    ) -> RepositoryResult<Vec<WorkerAssignment>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        update_plan_status(&tx, plan_id, PlanStatus::Released, PlanStatus::Active, launched_at)?;

        let scope = work_package_scope(plan_code);
        for a in assignments.iter_mut() {
            let seq = allocate_in(&tx, &scope)?;
            a.code = format_work_package_code(plan_code, seq);
            a.plan_id = plan_id;
            a.assignment_id = insert_assignment(&tx, a)?;
        }

        tx.commit()?;
        tracing::info!(plan_id, count = assignments.len(), "工单批量写入完成");
        Ok(assignments)
    }

    /// 按ID查询工单
    pub fn find_by_id(&self, assignment_id: i64) -> RepositoryResult<Option<WorkerAssignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM worker_assignment WHERE assignment_id = ?1",
            ASSIGNMENT_COLUMNS
        );
        let a = conn
            .query_row(&sql, params![assignment_id], map_assignment_row)
            .optional()?;
        Ok(a)
    }

    /// 按ID查询工单, 不存在时返回 NotFound
    pub fn get(&self, assignment_id: i64) -> RepositoryResult<WorkerAssignment> {
        self.find_by_id(assignment_id)?
            .ok_or_else(|| RepositoryError::not_found("WorkerAssignment", assignment_id))
    }

    /// 列出计划的全部工单
    pub fn list_by_plan(&self, plan_id: i64) -> RepositoryResult<Vec<WorkerAssignment>> {
        self.query_list("plan_id = ?1", params![plan_id])
    }

    /// 列出人员的非终态工单（到达顺序）
    pub fn list_open_by_worker(&self, worker_id: i64) -> RepositoryResult<Vec<WorkerAssignment>> {
        self.query_list(
            &format!("worker_id = ?1 AND status IN {}", OPEN_STATUSES),
            params![worker_id],
        )
    }

    /// 列出工位的非终态工单
    pub fn list_open_by_station(&self, station_id: i64) -> RepositoryResult<Vec<WorkerAssignment>> {
        self.query_list(
            &format!("station_id = ?1 AND status IN {}", OPEN_STATUSES),
            params![station_id],
        )
    }

    /// 列出全部非终态工单（排程队尾来源）
    pub fn list_open(&self) -> RepositoryResult<Vec<WorkerAssignment>> {
        self.query_list(&format!("status IN {}", OPEN_STATUSES), params![])
    }

    /// 人员是否已有其他进行中的工单
    pub fn has_started_for_worker(&self, worker_id: i64, exclude_assignment_id: i64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            r#"SELECT COUNT(*) FROM worker_assignment
               WHERE worker_id = ?1 AND status = 'STARTED' AND assignment_id <> ?2"#,
            params![worker_id, exclude_assignment_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// 计划工单进度统计
    pub fn plan_progress(&self, plan_id: i64) -> RepositoryResult<PlanProgress> {
        let conn = self.get_conn()?;
        let (total, open, completed): (i64, i64, i64) = conn.query_row(
            &format!(
                r#"SELECT COUNT(*),
                          COALESCE(SUM(CASE WHEN status IN {} THEN 1 ELSE 0 END), 0),
                          COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END), 0)
                   FROM worker_assignment WHERE plan_id = ?1"#,
                OPEN_STATUSES
            ),
            params![plan_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(PlanProgress {
            total: total as usize,
            open: open as usize,
            completed: completed as usize,
        })
    }

    /// 提交状态迁移: 执行台账动作并整行更新工单
    ///
    /// # 红线
    /// - 必须在事务中完成, 台账或工单行任一失败整体回滚
    pub fn commit_transition(&self, next: &WorkerAssignment, effects: &LedgerEffects) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        apply_effects_in(&tx, effects)?;
        update_in(&tx, next)?;

        tx.commit()?;
        tracing::debug!(
            assignment_id = next.assignment_id,
            status = %next.status,
            reserved = effects.reserve.len(),
            consumed = effects.consume.len(),
            released = effects.release.len(),
            "工单迁移已提交"
        );
        Ok(())
    }

    /// 批量写入队列位置（事务内）
    pub fn apply_queue_positions(&self, positions: &[QueuePosition]) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"UPDATE worker_assignment
                   SET sequence_number = ?1, optimized_start = ?2, optimized_end = ?3
                   WHERE assignment_id = ?4"#,
            )?;
            for p in positions {
                stmt.execute(params![
                    p.sequence_number,
                    fmt_opt_ts(&p.optimized_start),
                    fmt_opt_ts(&p.optimized_end),
                    p.assignment_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query_list(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> RepositoryResult<Vec<WorkerAssignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM worker_assignment WHERE {} ORDER BY created_at, assignment_id",
            ASSIGNMENT_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, map_assignment_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn update_in(conn: &Connection, a: &WorkerAssignment) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"UPDATE worker_assignment SET
            worker_id = ?1, station_id = ?2, substation_ids_json = ?3, status = ?4,
            sequence_number = ?5, actual_output_quantity = ?6,
            materials_reserved_json = ?7, materials_consumed_json = ?8,
            material_reservation_status = ?9,
            optimized_start = ?10, optimized_end = ?11,
            started_at = ?12, completed_at = ?13, cancel_reason = ?14, updated_at = ?15
           WHERE assignment_id = ?16"#,
        params![
            a.worker_id,
            a.station_id,
            to_json("substation_ids", &a.substation_ids)?,
            a.status.to_db_str(),
            a.sequence_number,
            a.actual_output_quantity,
            to_json("materials_reserved", &a.materials_reserved)?,
            to_json("materials_consumed", &a.materials_consumed)?,
            a.material_reservation_status.to_db_str(),
            fmt_opt_ts(&a.optimized_start),
            fmt_opt_ts(&a.optimized_end),
            fmt_opt_ts(&a.started_at),
            fmt_opt_ts(&a.completed_at),
            a.cancel_reason,
            fmt_ts(&a.updated_at),
            a.assignment_id,
        ],
    )?;
    if affected == 0 {
        return Err(RepositoryError::not_found("WorkerAssignment", a.assignment_id));
    }
    Ok(())
}

fn insert_assignment(conn: &Connection, a: &WorkerAssignment) -> RepositoryResult<i64> {
    conn.execute(
        r#"INSERT INTO worker_assignment (
            code, plan_id, node_id, unit_index, worker_id, station_id, substation_ids_json,
            status, scheduling_mode, urgent, sequence_number,
            nominal_time_min, effective_time_min, efficiency_override,
            planned_output_quantity, actual_output_quantity, output_material_code,
            materials_required_json, materials_reserved_json, materials_consumed_json,
            material_reservation_status,
            estimated_start, estimated_end, optimized_start, optimized_end,
            started_at, completed_at, cancel_reason, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                  ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)"#,
        params![
            a.code,
            a.plan_id,
            a.node_id,
            a.unit_index,
            a.worker_id,
            a.station_id,
            to_json("substation_ids", &a.substation_ids)?,
            a.status.to_db_str(),
            a.scheduling_mode.to_db_str(),
            a.urgent,
            a.sequence_number,
            a.nominal_time_min,
            a.effective_time_min,
            a.efficiency_override,
            a.planned_output_quantity,
            a.actual_output_quantity,
            a.output_material_code,
            to_json("materials_required", &a.materials_required)?,
            to_json("materials_reserved", &a.materials_reserved)?,
            to_json("materials_consumed", &a.materials_consumed)?,
            a.material_reservation_status.to_db_str(),
            fmt_opt_ts(&a.estimated_start),
            fmt_opt_ts(&a.estimated_end),
            fmt_opt_ts(&a.optimized_start),
            fmt_opt_ts(&a.optimized_end),
            fmt_opt_ts(&a.started_at),
            fmt_opt_ts(&a.completed_at),
            a.cancel_reason,
            fmt_ts(&a.created_at),
            fmt_ts(&a.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn map_assignment_row(row: &rusqlite::Row) -> rusqlite::Result<WorkerAssignment> {
    let status: String = row.get(8)?;
    let scheduling_mode: String = row.get(9)?;
    let reservation_status: String = row.get(21)?;
    Ok(WorkerAssignment {
        assignment_id: row.get(0)?,
        code: row.get(1)?,
        plan_id: row.get(2)?,
        node_id: row.get(3)?,
        unit_index: row.get(4)?,
        worker_id: row.get(5)?,
        station_id: row.get(6)?,
        substation_ids: get_json(row, 7)?,
        status: AssignmentStatus::from_str(&status).ok_or_else(|| enum_err(8, &status))?,
        scheduling_mode: SchedulingMode::from_str(&scheduling_mode)
            .ok_or_else(|| enum_err(9, &scheduling_mode))?,
        urgent: row.get(10)?,
        sequence_number: row.get(11)?,
        nominal_time_min: row.get(12)?,
        effective_time_min: row.get(13)?,
        efficiency_override: row.get(14)?,
        planned_output_quantity: row.get(15)?,
        actual_output_quantity: row.get(16)?,
        output_material_code: row.get(17)?,
        materials_required: get_json(row, 18)?,
        materials_reserved: get_json(row, 19)?,
        materials_consumed: get_json(row, 20)?,
        material_reservation_status: MaterialReservationStatus::from_str(&reservation_status),
        estimated_start: get_opt_ts(row, 22)?,
        estimated_end: get_opt_ts(row, 23)?,
        optimized_start: get_opt_ts(row, 24)?,
        optimized_end: get_opt_ts(row, 25)?,
        started_at: get_opt_ts(row, 26)?,
        completed_at: get_opt_ts(row, 27)?,
        cancel_reason: row.get(28)?,
        created_at: get_ts(row, 29)?,
        updated_at: get_ts(row, 30)?,
    })
}
