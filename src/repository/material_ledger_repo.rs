// ==========================================
// 车间生产执行调度系统 - 物料台账仓储
// ==========================================
// 职责: MaterialLedger 的 SQLite 实现
//       material_stock（在库/已预留）、material_reservation、material_ledger_entry（追加）
// 红线: 检查与预留在同一事务内, 并发开工不会超额预留
// 红线: 工单迁移的台账动作经 apply_effects_in 在调用方事务内执行
// 红线: 台账流水只追加, 不改写
// ==========================================

use crate::domain::types::MaterialReservationStatus;
use crate::engine::ledger::{
    Consumption, LedgerEffects, LedgerError, LedgerResult, MaterialLedger, ReserveRequest,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::fmt_ts;
use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const QTY_EPSILON: f64 = 1e-9;

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Repository(RepositoryError::from(err))
    }
}

// 与工单行同事务执行时, 台账错误折叠为仓储错误
impl From<LedgerError> for RepositoryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock {
                material_code,
                requested,
                available,
            } => RepositoryError::InsufficientStock {
                material_code,
                requested,
                available,
            },
            LedgerError::ReservationNotFound(id) => RepositoryError::not_found("MaterialReservation", id),
            LedgerError::ReservationClosed { reservation_id, status } => {
                RepositoryError::InvalidStateTransition {
                    from: status,
                    to: format!("reservation {} closed", reservation_id),
                }
            }
            LedgerError::InvalidQuantity(q) => RepositoryError::ValidationError(format!("台账数量无效: {}", q)),
            LedgerError::Repository(e) => e,
        }
    }
}

/// 库存水位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub material_code: String,
    pub on_hand: f64,
    pub reserved: f64,
}

impl StockLevel {
    /// 可用量 = 在库 - 已预留
    pub fn available(&self) -> f64 {
        self.on_hand - self.reserved
    }
}

// ==========================================
// SqliteMaterialLedger - 物料台账
// ==========================================
pub struct SqliteMaterialLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMaterialLedger {
    /// 创建新的SqliteMaterialLedger实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 查询库存水位（未建档物料返回 None）
    pub fn stock_of(&self, material_code: &str) -> RepositoryResult<Option<StockLevel>> {
        let conn = self.get_conn()?;
        let level = conn
            .query_row(
                "SELECT material_code, on_hand, reserved FROM material_stock WHERE material_code = ?1",
                params![material_code],
                |row| {
                    Ok(StockLevel {
                        material_code: row.get(0)?,
                        on_hand: row.get(1)?,
                        reserved: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(level)
    }

    /// 查询预留状态
    pub fn reservation_status(
        &self,
        reservation_id: &str,
    ) -> RepositoryResult<Option<MaterialReservationStatus>> {
        let conn = self.get_conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM material_reservation WHERE reservation_id = ?1",
                params![reservation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.map(|s| MaterialReservationStatus::from_str(&s)))
    }

    /// 物料流水条数（按类型）
    pub fn count_entries(&self, material_code: &str, entry_type: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM material_ledger_entry WHERE material_code = ?1 AND entry_type = ?2",
            params![material_code, entry_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

impl MaterialLedger for SqliteMaterialLedger {
    fn reserve(&self, material_code: &str, quantity: f64) -> LedgerResult<String> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let id = reserve_in(&tx, material_code, quantity)?;
        tx.commit()?;
        Ok(id)
    }

    fn consume(&self, reservation_id: &str, actual_quantity: f64) -> LedgerResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        consume_in(&tx, reservation_id, actual_quantity)?;
        tx.commit()?;
        Ok(())
    }

    fn release(&self, reservation_id: &str) -> LedgerResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        release_in(&tx, reservation_id)?;
        tx.commit()?;
        Ok(())
    }

    fn credit(&self, material_code: &str, quantity: f64) -> LedgerResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        credit_in(&tx, material_code, quantity)?;
        tx.commit()?;
        Ok(())
    }

    /// 单事务批量预留, 任一物料不足则整体回滚
    fn reserve_all(&self, requests: &[ReserveRequest]) -> LedgerResult<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(requests.len());
        for req in requests {
            ids.push(reserve_in(&tx, &req.material_code, req.quantity)?);
        }
        tx.commit()?;
        tracing::debug!(count = ids.len(), "批量预留完成");
        Ok(ids)
    }

    /// 单事务结算: 消耗全部预留并入库产出
    fn settle(&self, consumptions: &[Consumption], output: Option<(&str, f64)>) -> LedgerResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for c in consumptions {
            consume_in(&tx, &c.reservation_id, c.quantity)?;
        }
        if let Some((code, qty)) = output {
            credit_in(&tx, code, qty)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn now_str() -> String {
    fmt_ts(&Local::now().naive_local())
}

fn append_entry(
    conn: &Connection,
    material_code: &str,
    entry_type: &str,
    quantity: f64,
    reservation_id: Option<&str>,
) -> LedgerResult<()> {
    conn.execute(
        r#"INSERT INTO material_ledger_entry (material_code, entry_type, quantity, reservation_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
        params![material_code, entry_type, quantity, reservation_id, now_str()],
    )?;
    Ok(())
}

/// 在调用方事务内执行一次工单迁移的台账动作
pub(crate) fn apply_effects_in(conn: &Connection, effects: &LedgerEffects) -> LedgerResult<()> {
    for r in &effects.reserve {
        reserve_with_id_in(conn, &r.reservation_id, &r.material_code, r.quantity)?;
    }
    for c in &effects.consume {
        consume_in(conn, &c.reservation_id, c.quantity)?;
    }
    for id in &effects.release {
        release_in(conn, id)?;
    }
    if let Some((code, qty)) = &effects.credit {
        credit_in(conn, code, *qty)?;
    }
    Ok(())
}

fn reserve_in(conn: &Connection, material_code: &str, quantity: f64) -> LedgerResult<String> {
    let reservation_id = Uuid::new_v4().to_string();
    reserve_with_id_in(conn, &reservation_id, material_code, quantity)?;
    Ok(reservation_id)
}

fn reserve_with_id_in(
    conn: &Connection,
    reservation_id: &str,
    material_code: &str,
    quantity: f64,
) -> LedgerResult<()> {
    if !(quantity > 0.0) {
        return Err(LedgerError::InvalidQuantity(quantity));
    }

    let stock: Option<(f64, f64)> = conn
        .query_row(
            "SELECT on_hand, reserved FROM material_stock WHERE material_code = ?1",
            params![material_code],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let available = stock.map_or(0.0, |(on_hand, reserved)| on_hand - reserved);
    if quantity > available + QTY_EPSILON {
        tracing::warn!(material_code, requested = quantity, available, "预留失败: 库存不足");
        return Err(LedgerError::InsufficientStock {
            material_code: material_code.to_string(),
            requested: quantity,
            available: available.max(0.0),
        });
    }

    let now = now_str();
    conn.execute(
        "UPDATE material_stock SET reserved = reserved + ?1, updated_at = ?2 WHERE material_code = ?3",
        params![quantity, now, material_code],
    )?;

    conn.execute(
        r#"INSERT INTO material_reservation (reservation_id, material_code, quantity, status, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
        params![
            reservation_id,
            material_code,
            quantity,
            MaterialReservationStatus::Reserved.to_db_str(),
            now
        ],
    )?;
    append_entry(conn, material_code, "RESERVE", quantity, Some(reservation_id))?;
    Ok(())
}

/// 读取预留 (material_code, quantity, status)
fn load_reservation(
    conn: &Connection,
    reservation_id: &str,
) -> LedgerResult<(String, f64, MaterialReservationStatus)> {
    let row: Option<(String, f64, String)> = conn
        .query_row(
            "SELECT material_code, quantity, status FROM material_reservation WHERE reservation_id = ?1",
            params![reservation_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let (code, qty, status) =
        row.ok_or_else(|| LedgerError::ReservationNotFound(reservation_id.to_string()))?;
    Ok((code, qty, MaterialReservationStatus::from_str(&status)))
}

fn close_reservation(
    conn: &Connection,
    reservation_id: &str,
    status: MaterialReservationStatus,
) -> LedgerResult<()> {
    conn.execute(
        "UPDATE material_reservation SET status = ?1, closed_at = ?2 WHERE reservation_id = ?3",
        params![status.to_db_str(), now_str(), reservation_id],
    )?;
    Ok(())
}

/// 消耗预留: 释放预留量, 按实际用量扣减在库
///
/// 实际用量超出预留时差额直接扣减在库（实物已消耗）
fn consume_in(conn: &Connection, reservation_id: &str, actual_quantity: f64) -> LedgerResult<()> {
    if actual_quantity < 0.0 {
        return Err(LedgerError::InvalidQuantity(actual_quantity));
    }
    let (code, reserved_qty, status) = load_reservation(conn, reservation_id)?;
    if status != MaterialReservationStatus::Reserved {
        return Err(LedgerError::ReservationClosed {
            reservation_id: reservation_id.to_string(),
            status: status.to_string(),
        });
    }

    conn.execute(
        r#"UPDATE material_stock
           SET reserved = MAX(reserved - ?1, 0), on_hand = on_hand - ?2, updated_at = ?3
           WHERE material_code = ?4"#,
        params![reserved_qty, actual_quantity, now_str(), code],
    )?;
    if actual_quantity > reserved_qty + QTY_EPSILON {
        tracing::warn!(
            material_code = %code,
            reserved = reserved_qty,
            actual = actual_quantity,
            "实际消耗超出预留"
        );
    }

    close_reservation(conn, reservation_id, MaterialReservationStatus::Consumed)?;
    append_entry(conn, &code, "CONSUME", actual_quantity, Some(reservation_id))?;
    Ok(())
}

/// 释放预留（已释放的重复释放视为成功）
fn release_in(conn: &Connection, reservation_id: &str) -> LedgerResult<()> {
    let (code, reserved_qty, status) = load_reservation(conn, reservation_id)?;
    match status {
        MaterialReservationStatus::Released => return Ok(()),
        MaterialReservationStatus::Reserved => {}
        other => {
            return Err(LedgerError::ReservationClosed {
                reservation_id: reservation_id.to_string(),
                status: other.to_string(),
            })
        }
    }

    conn.execute(
        "UPDATE material_stock SET reserved = MAX(reserved - ?1, 0), updated_at = ?2 WHERE material_code = ?3",
        params![reserved_qty, now_str(), code],
    )?;
    close_reservation(conn, reservation_id, MaterialReservationStatus::Released)?;
    append_entry(conn, &code, "RELEASE", reserved_qty, Some(reservation_id))?;
    Ok(())
}

fn credit_in(conn: &Connection, material_code: &str, quantity: f64) -> LedgerResult<()> {
    if !(quantity > 0.0) {
        return Err(LedgerError::InvalidQuantity(quantity));
    }
    conn.execute(
        r#"INSERT INTO material_stock (material_code, on_hand, reserved, updated_at)
           VALUES (?1, ?2, 0, ?3)
           ON CONFLICT(material_code) DO UPDATE SET on_hand = on_hand + excluded.on_hand,
                                                    updated_at = excluded.updated_at"#,
        params![material_code, quantity, now_str()],
    )?;
    append_entry(conn, material_code, "CREDIT", quantity, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_ledger() -> SqliteMaterialLedger {
        let conn = crate::db::open_in_memory().unwrap();
        SqliteMaterialLedger::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_reserve_checks_available() {
        let ledger = setup_ledger();
        ledger.credit("STEEL", 10.0).unwrap();

        let id = ledger.reserve("STEEL", 6.0).unwrap();
        let err = ledger.reserve("STEEL", 5.0).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock { available, .. } if (available - 4.0).abs() < 1e-9
        ));

        let stock = ledger.stock_of("STEEL").unwrap().unwrap();
        assert!((stock.reserved - 6.0).abs() < 1e-9);
        assert_eq!(
            ledger.reservation_status(&id).unwrap(),
            Some(MaterialReservationStatus::Reserved)
        );
    }

    #[test]
    fn test_unknown_material_is_insufficient() {
        let ledger = setup_ledger();
        assert!(matches!(
            ledger.reserve("NOPE", 1.0),
            Err(LedgerError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn test_reserve_all_rolls_back_on_failure() {
        let ledger = setup_ledger();
        ledger.credit("A", 5.0).unwrap();
        ledger.credit("B", 1.0).unwrap();

        let err = ledger
            .reserve_all(&[
                ReserveRequest { material_code: "A".to_string(), quantity: 5.0 },
                ReserveRequest { material_code: "B".to_string(), quantity: 2.0 },
            ])
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { .. }));

        let a = ledger.stock_of("A").unwrap().unwrap();
        assert!(a.reserved.abs() < 1e-9);
        assert_eq!(ledger.count_entries("A", "RESERVE").unwrap(), 0);
    }

    #[test]
    fn test_consume_release_and_credit() {
        let ledger = setup_ledger();
        ledger.credit("STEEL", 10.0).unwrap();

        let r1 = ledger.reserve("STEEL", 4.0).unwrap();
        let r2 = ledger.reserve("STEEL", 3.0).unwrap();
        ledger
            .settle(
                &[Consumption { reservation_id: r1.clone(), quantity: 5.0 }],
                Some(("PART", 2.0)),
            )
            .unwrap();
        ledger.release(&r2).unwrap();
        // 重复释放幂等
        ledger.release(&r2).unwrap();

        let steel = ledger.stock_of("STEEL").unwrap().unwrap();
        assert!((steel.on_hand - 5.0).abs() < 1e-9);
        assert!(steel.reserved.abs() < 1e-9);
        let part = ledger.stock_of("PART").unwrap().unwrap();
        assert!((part.on_hand - 2.0).abs() < 1e-9);

        // 已消耗的预留不可再释放
        assert!(matches!(
            ledger.release(&r1),
            Err(LedgerError::ReservationClosed { .. })
        ));
        assert_eq!(ledger.count_entries("STEEL", "CONSUME").unwrap(), 1);
        assert_eq!(ledger.count_entries("STEEL", "RELEASE").unwrap(), 1);
    }
}
