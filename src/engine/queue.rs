// ==========================================
// 车间生产执行调度系统 - 队列排序与按键加锁
// ==========================================
// 职责:
// - 人员队列排序: 已开工 → (PRIORITY 模式下) 紧急 → 到达顺序
// - 队列压缩: 重写 sequence_number 1..n, 重新推算 optimized 时间
//   未开工工单不早于其 estimated_start（前置依赖与工位队尾已计入）
// - 队列变更按 人员/工位/子工位 键串行化, 不同键可并发
// ==========================================

use crate::domain::assignment::WorkerAssignment;
use crate::domain::calendar::CalendarProvider;
use crate::domain::types::{AssignmentStatus, SchedulingMode};
use crate::engine::calendar::{end_after, snap_to_work};
use crate::engine::error::{EngineError, EngineResult};
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Condvar, Mutex};

// ==========================================
// 队列排序
// ==========================================

/// 队列排序键（越小越靠前）
fn queue_rank(a: &WorkerAssignment) -> (bool, bool, NaiveDateTime, i64) {
    let started = a.status == AssignmentStatus::Started;
    let urgent = a.scheduling_mode == SchedulingMode::Priority && a.urgent;
    (!started, !urgent, a.created_at, a.assignment_id)
}

/// 队列压缩结果
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePosition {
    pub assignment_id: i64,
    pub sequence_number: Option<i32>,
    pub optimized_start: Option<NaiveDateTime>,
    pub optimized_end: Option<NaiveDateTime>,
}

/// 压缩单个人员的队列
///
/// # 参数
/// - `assignments`: 该人员的工单（可包含终态, 终态序号清空）
/// - `now`: 推算起点
///
/// # 返回
/// - `Ok`: 每个输入工单一条位置记录; 非终态按队列顺序在前
/// - `Err(UnschedulableNode)`: 有效工时超出时间范围
pub fn compact_queue(
    assignments: &[WorkerAssignment],
    worker_id: i64,
    now: NaiveDateTime,
    calendars: &dyn CalendarProvider,
    horizon_days: u32,
) -> EngineResult<Vec<QueuePosition>> {
    let mut queued: Vec<&WorkerAssignment> = assignments.iter().filter(|a| a.is_queued()).collect();
    queued.sort_by_key(|a| queue_rank(a));

    let mut positions = Vec::with_capacity(assignments.len());
    let mut cursor = now;
    for (idx, a) in queued.iter().enumerate() {
        let start = match (a.status, a.started_at) {
            (AssignmentStatus::Started, Some(at)) => at,
            _ => {
                let floor = a.estimated_start.map_or(cursor, |e| e.max(cursor));
                snap_to_work(calendars, Some(worker_id), floor, horizon_days)
            }
        };
        let end = end_after(start, a.effective_time_min).ok_or_else(|| EngineError::UnschedulableNode {
            node_id: a.node_id,
            reason: format!(
                "工单 {} 有效工时 {} 分钟超出可排程的时间范围",
                a.assignment_id, a.effective_time_min
            ),
        })?;
        cursor = cursor.max(end);
        positions.push(QueuePosition {
            assignment_id: a.assignment_id,
            sequence_number: Some(idx as i32 + 1),
            optimized_start: Some(start),
            optimized_end: Some(end),
        });
    }

    for a in assignments.iter().filter(|a| !a.is_queued()) {
        positions.push(QueuePosition {
            assignment_id: a.assignment_id,
            sequence_number: None,
            optimized_start: a.optimized_start,
            optimized_end: a.optimized_end,
        });
    }
    Ok(positions)
}

// ==========================================
// KeyedLocks - 按键互斥
// ==========================================

/// 队列键
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueKey {
    Worker(i64),
    Station(i64),
    Substation(i64),
}

impl QueueKey {
    /// 工单涉及的全部队列键
    pub fn for_assignment(a: &WorkerAssignment) -> Vec<QueueKey> {
        let mut keys = Vec::new();
        if let Some(w) = a.worker_id {
            keys.push(QueueKey::Worker(w));
        }
        if let Some(s) = a.station_id {
            keys.push(QueueKey::Station(s));
        }
        keys.extend(a.substation_ids.iter().map(|s| QueueKey::Substation(*s)));
        keys
    }
}

#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<QueueKey>>,
    released: Condvar,
}

/// 按键锁注册表
///
/// 一次性获取全部键（全部空闲才占用）, 避免多键交叉等待
#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Arc<LockTable>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 阻塞直到全部键可用
    pub fn acquire<I>(&self, keys: I) -> EngineResult<KeyedLockGuard>
    where
        I: IntoIterator<Item = QueueKey>,
    {
        let keys: BTreeSet<QueueKey> = keys.into_iter().collect();
        let mut held = self
            .table
            .held
            .lock()
            .map_err(|e| EngineError::LockError(e.to_string()))?;
        while keys.iter().any(|k| held.contains(k)) {
            held = self
                .table
                .released
                .wait(held)
                .map_err(|e| EngineError::LockError(e.to_string()))?;
        }
        held.extend(keys.iter().copied());
        tracing::trace!(keys = ?keys, "队列键已加锁");

        Ok(KeyedLockGuard {
            table: Arc::clone(&self.table),
            keys,
        })
    }

    /// 当前被占用的键数量
    pub fn held_count(&self) -> usize {
        self.table.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

/// 释放时归还全部键
pub struct KeyedLockGuard {
    table: Arc<LockTable>,
    keys: BTreeSet<QueueKey>,
}

impl KeyedLockGuard {
    pub fn keys(&self) -> impl Iterator<Item = &QueueKey> {
        self.keys.iter()
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        // 中毒时仍归还键, 否则等待方永久阻塞
        let mut held = match self.table.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for k in &self.keys {
            held.remove(k);
        }
        self.table.released.notify_all();
    }
}
