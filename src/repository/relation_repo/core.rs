use crate::domain::relation::{EntityRef, EntityRelation, RelationTarget};
use crate::domain::types::RelationType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::sql;

/// link 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkOutcome {
    /// 新建关系行
    Created(i64),
    /// 完全相同的关系已存在（幂等命中）
    AlreadyLinked(i64),
}

impl LinkOutcome {
    pub fn relation_id(&self) -> i64 {
        match self {
            LinkOutcome::Created(id) | LinkOutcome::AlreadyLinked(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, LinkOutcome::Created(_))
    }
}

// ==========================================
// RelationRepository - 通用关系仓储
// ==========================================
pub struct RelationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RelationRepository {
    /// 创建新的RelationRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 建立关系
    ///
    /// # 返回
    /// - `Ok(LinkOutcome::Created)`: 新建
    /// - `Ok(LinkOutcome::AlreadyLinked)`: 相同关系已存在, 未新增行
    /// - `Err(DuplicateRelation)`: 唯一键冲突且 priority/target_type 不同
    pub fn link(
        &self,
        source: EntityRef,
        relation_type: RelationType,
        target: EntityRef,
        priority: Option<i32>,
    ) -> RepositoryResult<LinkOutcome> {
        let conn = self.get_conn()?;
        let outcome = sql::link(&conn, source, relation_type, target, priority)?;
        tracing::debug!(
            source = ?source,
            relation_type = %relation_type,
            target = ?target,
            created = outcome.is_created(),
            "关系写入"
        );
        Ok(outcome)
    }

    /// 删除关系
    pub fn unlink(
        &self,
        source: EntityRef,
        relation_type: RelationType,
        target_id: i64,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        sql::unlink(&conn, source, relation_type, target_id)
    }

    /// 正向查询 (target_id, priority), 按优先级排序
    pub fn query(
        &self,
        source: EntityRef,
        relation_type: RelationType,
    ) -> RepositoryResult<Vec<RelationTarget>> {
        let conn = self.get_conn()?;
        sql::query(&conn, source, relation_type)
    }

    /// 反向查询（影响分析）: 哪些 source 引用了 target_id
    pub fn reverse(
        &self,
        relation_type: RelationType,
        target_id: i64,
    ) -> RepositoryResult<Vec<EntityRef>> {
        let conn = self.get_conn()?;
        sql::reverse(&conn, relation_type, target_id)
    }

    /// 实体删除时清理其全部关系行
    pub fn purge_entity(&self, entity: EntityRef) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let removed = sql::purge_entity(&conn, entity)?;
        tracing::debug!(entity = ?entity, removed, "清理实体关系");
        Ok(removed)
    }

    /// 查询实体作为 source 的全部关系
    pub fn list_for_source(&self, source: EntityRef) -> RepositoryResult<Vec<EntityRelation>> {
        let conn = self.get_conn()?;
        sql::list_for_source(&conn, source)
    }
}
