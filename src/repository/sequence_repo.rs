// ==========================================
// 车间生产执行调度系统 - 编码序列仓储
// ==========================================
// 职责: 按作用域分配单调递增、不冲突的序号
//       计划编码 PP-{year}-{nnnn}, 工作包编码 {plan_code}-WP-{nnn}
// 红线: 序号在事务内分配, 不使用进程内计数器
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// 计划编码作用域
pub fn plan_scope(year: i32) -> String {
    format!("PLAN-{}", year)
}

/// 工作包编码作用域
pub fn work_package_scope(plan_code: &str) -> String {
    format!("WP-{}", plan_code)
}

pub fn format_plan_code(year: i32, seq: i64) -> String {
    format!("PP-{}-{:04}", year, seq)
}

pub fn format_work_package_code(plan_code: &str, seq: i64) -> String {
    format!("{}-WP-{:03}", plan_code, seq)
}

// ==========================================
// CodeSequenceRepository - 编码序列仓储
// ==========================================
pub struct CodeSequenceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CodeSequenceRepository {
    /// 创建新的CodeSequenceRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 分配作用域内的下一个序号（从 1 开始）
    pub fn allocate(&self, scope_key: &str) -> RepositoryResult<i64> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let value = allocate_in(&tx, scope_key)?;
        tx.commit()?;
        Ok(value)
    }

    /// 分配下一个计划编码
    pub fn next_plan_code(&self, year: i32) -> RepositoryResult<String> {
        let seq = self.allocate(&plan_scope(year))?;
        Ok(format_plan_code(year, seq))
    }

    /// 查询作用域当前已分配的最大序号
    pub fn current(&self, scope_key: &str) -> RepositoryResult<Option<i64>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT last_value FROM code_sequence WHERE scope_key = ?1",
                params![scope_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

/// 在调用方事务内分配序号
pub(crate) fn allocate_in(conn: &Connection, scope_key: &str) -> RepositoryResult<i64> {
    conn.execute(
        r#"INSERT INTO code_sequence (scope_key, last_value) VALUES (?1, 1)
           ON CONFLICT(scope_key) DO UPDATE SET last_value = last_value + 1"#,
        params![scope_key],
    )?;
    let value: i64 = conn.query_row(
        "SELECT last_value FROM code_sequence WHERE scope_key = ?1",
        params![scope_key],
        |row| row.get(0),
    )?;
    Ok(value)
}
