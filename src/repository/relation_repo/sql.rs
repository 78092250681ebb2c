// ==========================================
// 车间生产执行调度系统 - 关系表 SQL
// ==========================================
// 职责: 基于 &Connection 的关系读写
// 约定: 节点仓储在自身事务中复用, 节点行与关系行同进同退
// ==========================================

use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};

use super::core::LinkOutcome;
use crate::domain::plan::StationCandidate;
use crate::domain::relation::{EntityRef, EntityRelation, RelationTarget};
use crate::domain::types::{EntityType, RelationType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{enum_err, fmt_ts, get_ts};

/// 校验关系两端实体类型与关系类型一致
fn check_endpoints(
    source: &EntityRef,
    relation_type: RelationType,
    target: &EntityRef,
) -> RepositoryResult<()> {
    let (expected_source, expected_target) = relation_type.endpoints();
    if source.entity_type != expected_source || target.entity_type != expected_target {
        return Err(RepositoryError::ValidationError(format!(
            "关系 {} 要求 {} → {}, 实际 {} → {}",
            relation_type,
            expected_source,
            expected_target,
            source.entity_type,
            target.entity_type
        )));
    }
    if relation_type == RelationType::NodePredecessor && source.id == target.id {
        return Err(RepositoryError::ValidationError(format!(
            "节点 {} 不能以自身为前置",
            source.id
        )));
    }
    Ok(())
}

/// 建立关系（幂等）
///
/// - 相同参数重复调用: 返回 `AlreadyLinked`, 不新增行
/// - 唯一键相同但 target_type/priority 不同: `DuplicateRelation`
pub fn link(
    conn: &Connection,
    source: EntityRef,
    relation_type: RelationType,
    target: EntityRef,
    priority: Option<i32>,
) -> RepositoryResult<LinkOutcome> {
    check_endpoints(&source, relation_type, &target)?;

    let existing: Option<(i64, String, Option<i32>)> = conn
        .query_row(
            r#"SELECT relation_id, target_type, priority
               FROM entity_relation
               WHERE source_type = ?1 AND source_id = ?2 AND relation_type = ?3 AND target_id = ?4"#,
            params![
                source.entity_type.to_db_str(),
                source.id,
                relation_type.to_db_str(),
                target.id
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    if let Some((relation_id, target_type, existing_priority)) = existing {
        if target_type == target.entity_type.to_db_str() && existing_priority == priority {
            return Ok(LinkOutcome::AlreadyLinked(relation_id));
        }
        return Err(RepositoryError::DuplicateRelation(format!(
            "{}({}) -[{}]-> {} 已存在 (priority={:?}, 请求 priority={:?})",
            source.entity_type, source.id, relation_type, target.id, existing_priority, priority
        )));
    }

    conn.execute(
        r#"INSERT INTO entity_relation (
            source_type, source_id, relation_type, target_type, target_id, priority, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            source.entity_type.to_db_str(),
            source.id,
            relation_type.to_db_str(),
            target.entity_type.to_db_str(),
            target.id,
            priority,
            fmt_ts(&Local::now().naive_local()),
        ],
    )?;

    Ok(LinkOutcome::Created(conn.last_insert_rowid()))
}

/// 删除关系, 返回是否删除了行
pub fn unlink(
    conn: &Connection,
    source: EntityRef,
    relation_type: RelationType,
    target_id: i64,
) -> RepositoryResult<bool> {
    let affected = conn.execute(
        r#"DELETE FROM entity_relation
           WHERE source_type = ?1 AND source_id = ?2 AND relation_type = ?3 AND target_id = ?4"#,
        params![
            source.entity_type.to_db_str(),
            source.id,
            relation_type.to_db_str(),
            target_id
        ],
    )?;
    Ok(affected > 0)
}

/// 正向查询, 有优先级的按优先级升序在前, 其余按 target_id
pub fn query(
    conn: &Connection,
    source: EntityRef,
    relation_type: RelationType,
) -> RepositoryResult<Vec<RelationTarget>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT target_id, priority
           FROM entity_relation
           WHERE source_type = ?1 AND source_id = ?2 AND relation_type = ?3
           ORDER BY priority IS NULL, priority, target_id"#,
    )?;

    let targets = stmt
        .query_map(
            params![source.entity_type.to_db_str(), source.id, relation_type.to_db_str()],
            |row| {
                Ok(RelationTarget {
                    target_id: row.get(0)?,
                    priority: row.get(1)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(targets)
}

/// 反向查询: 哪些实体以 target_id 为目标
pub fn reverse(
    conn: &Connection,
    relation_type: RelationType,
    target_id: i64,
) -> RepositoryResult<Vec<EntityRef>> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT source_type, source_id
           FROM entity_relation
           WHERE relation_type = ?1 AND target_id = ?2
           ORDER BY source_type, source_id"#,
    )?;

    let sources = stmt
        .query_map(params![relation_type.to_db_str(), target_id], |row| {
            let raw: String = row.get(0)?;
            let entity_type = EntityType::from_str(&raw).ok_or_else(|| enum_err(0, &raw))?;
            Ok(EntityRef::new(entity_type, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(sources)
}

/// 以 source 为起点、指定关系类型的全部目标替换为新集合
pub fn replace_targets(
    conn: &Connection,
    source: EntityRef,
    relation_type: RelationType,
    targets: &[(EntityRef, Option<i32>)],
) -> RepositoryResult<()> {
    conn.execute(
        r#"DELETE FROM entity_relation
           WHERE source_type = ?1 AND source_id = ?2 AND relation_type = ?3"#,
        params![source.entity_type.to_db_str(), source.id, relation_type.to_db_str()],
    )?;
    for (target, priority) in targets {
        link(conn, source, relation_type, *target, *priority)?;
    }
    Ok(())
}

/// 删除实体作为 source 或 target 的全部关系行
pub fn purge_entity(conn: &Connection, entity: EntityRef) -> RepositoryResult<usize> {
    let affected = conn.execute(
        r#"DELETE FROM entity_relation
           WHERE (source_type = ?1 AND source_id = ?2)
              OR (target_type = ?1 AND target_id = ?2)"#,
        params![entity.entity_type.to_db_str(), entity.id],
    )?;
    Ok(affected)
}

/// 查询某实体作为 source 的全部关系行
pub fn list_for_source(conn: &Connection, source: EntityRef) -> RepositoryResult<Vec<EntityRelation>> {
    let mut stmt = conn.prepare(
        r#"SELECT relation_id, source_type, source_id, relation_type,
                  target_type, target_id, priority, created_at
           FROM entity_relation
           WHERE source_type = ?1 AND source_id = ?2
           ORDER BY relation_type, priority IS NULL, priority, target_id"#,
    )?;

    let rows = stmt
        .query_map(params![source.entity_type.to_db_str(), source.id], map_relation_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_relation_row(row: &rusqlite::Row) -> rusqlite::Result<EntityRelation> {
    let source_type: String = row.get(1)?;
    let relation_type: String = row.get(3)?;
    let target_type: String = row.get(4)?;
    Ok(EntityRelation {
        relation_id: row.get(0)?,
        source: EntityRef::new(
            EntityType::from_str(&source_type).ok_or_else(|| enum_err(1, &source_type))?,
            row.get(2)?,
        ),
        relation_type: RelationType::from_str(&relation_type)
            .ok_or_else(|| enum_err(3, &relation_type))?,
        target: EntityRef::new(
            EntityType::from_str(&target_type).ok_or_else(|| enum_err(4, &target_type))?,
            row.get(5)?,
        ),
        priority: row.get(6)?,
        created_at: get_ts(row, 7)?,
    })
}

/// 读取节点候选工位（节点仓储在同一连接上复用）
pub fn load_candidate_stations(
    conn: &Connection,
    node_id: i64,
) -> RepositoryResult<Vec<StationCandidate>> {
    Ok(query(conn, EntityRef::node(node_id), RelationType::NodeStation)?
        .into_iter()
        .map(|t| StationCandidate {
            station_id: t.target_id,
            priority: t.priority.unwrap_or(i32::MAX),
        })
        .collect())
}
