use crate::domain::plan::ProductionPlan;
use crate::domain::types::PlanStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{enum_err, fmt_opt_ts, fmt_ts, get_opt_ts, get_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const PLAN_COLUMNS: &str = r#"plan_id, code, name, status, target_quantity, default_efficiency,
    planned_start, created_by, created_at, updated_at, released_at, launched_at, completed_at"#;

// ==========================================
// PlanRepository - 生产计划仓储
// ==========================================
pub struct PlanRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PlanRepository {
    /// 创建新的PlanRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建计划
    ///
    /// # 参数
    /// - `plan`: 计划对象（plan_id 忽略, 由数据库分配）
    ///
    /// # 返回
    /// - `Ok(plan_id)`: 新计划ID
    /// - `Err(UniqueConstraintViolation)`: 计划编码重复
    pub fn create(&self, plan: &ProductionPlan) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"INSERT INTO production_plan (
                code, name, status, target_quantity, default_efficiency,
                planned_start, created_by, created_at, updated_at,
                released_at, launched_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                plan.code,
                plan.name,
                plan.status.to_db_str(),
                plan.target_quantity,
                plan.default_efficiency,
                fmt_opt_ts(&plan.planned_start),
                plan.created_by,
                fmt_ts(&plan.created_at),
                fmt_ts(&plan.updated_at),
                fmt_opt_ts(&plan.released_at),
                fmt_opt_ts(&plan.launched_at),
                fmt_opt_ts(&plan.completed_at),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// 按ID查询计划
    pub fn find_by_id(&self, plan_id: i64) -> RepositoryResult<Option<ProductionPlan>> {
        let conn = self.get_conn()?;
        find_plan(&conn, plan_id)
    }

    /// 按ID查询计划, 不存在时返回 NotFound
    pub fn get(&self, plan_id: i64) -> RepositoryResult<ProductionPlan> {
        self.find_by_id(plan_id)?
            .ok_or_else(|| RepositoryError::not_found("ProductionPlan", plan_id))
    }

    /// 按编码查询计划
    pub fn find_by_code(&self, code: &str) -> RepositoryResult<Option<ProductionPlan>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM production_plan WHERE code = ?1", PLAN_COLUMNS);
        let plan = conn.query_row(&sql, params![code], map_plan_row).optional()?;
        Ok(plan)
    }

    /// 按状态列出计划
    pub fn list_by_status(&self, status: PlanStatus) -> RepositoryResult<Vec<ProductionPlan>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM production_plan WHERE status = ?1 ORDER BY plan_id",
            PLAN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let plans = stmt
            .query_map(params![status.to_db_str()], map_plan_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// 状态迁移（带前置状态条件）
    ///
    /// 只有当前状态等于 `from` 时才更新, 并写入对应的里程碑时间
    pub fn update_status(
        &self,
        plan_id: i64,
        from: PlanStatus,
        to: PlanStatus,
        at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        update_plan_status(&conn, plan_id, from, to, at)
    }
}

/// 在给定连接上查询计划（供跨仓储事务复用）
pub(crate) fn find_plan(conn: &Connection, plan_id: i64) -> RepositoryResult<Option<ProductionPlan>> {
    let sql = format!("SELECT {} FROM production_plan WHERE plan_id = ?1", PLAN_COLUMNS);
    let plan = conn.query_row(&sql, params![plan_id], map_plan_row).optional()?;
    Ok(plan)
}

/// 在给定连接上做条件状态迁移
pub(crate) fn update_plan_status(
    conn: &Connection,
    plan_id: i64,
    from: PlanStatus,
    to: PlanStatus,
    at: NaiveDateTime,
) -> RepositoryResult<()> {
    let milestone = match to {
        PlanStatus::Released => Some("released_at"),
        PlanStatus::Active => Some("launched_at"),
        PlanStatus::Completed | PlanStatus::Cancelled => Some("completed_at"),
        PlanStatus::Draft => None,
    };
    let sql = match milestone {
        Some(col) => format!(
            "UPDATE production_plan SET status = ?1, updated_at = ?2, {} = ?2 WHERE plan_id = ?3 AND status = ?4",
            col
        ),
        None => "UPDATE production_plan SET status = ?1, updated_at = ?2 WHERE plan_id = ?3 AND status = ?4"
            .to_string(),
    };

    let affected = conn.execute(
        &sql,
        params![to.to_db_str(), fmt_ts(&at), plan_id, from.to_db_str()],
    )?;

    if affected == 0 {
        let current = find_plan(conn, plan_id)?
            .ok_or_else(|| RepositoryError::not_found("ProductionPlan", plan_id))?;
        return Err(RepositoryError::InvalidStateTransition {
            from: current.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

fn map_plan_row(row: &rusqlite::Row) -> rusqlite::Result<ProductionPlan> {
    let status: String = row.get(3)?;
    Ok(ProductionPlan {
        plan_id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        status: PlanStatus::from_str(&status).ok_or_else(|| enum_err(3, &status))?,
        target_quantity: row.get(4)?,
        default_efficiency: row.get(5)?,
        planned_start: get_opt_ts(row, 6)?,
        created_by: row.get(7)?,
        created_at: get_ts(row, 8)?,
        updated_at: get_ts(row, 9)?,
        released_at: get_opt_ts(row, 10)?,
        launched_at: get_opt_ts(row, 11)?,
        completed_at: get_opt_ts(row, 12)?,
    })
}
