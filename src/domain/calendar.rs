// ==========================================
// 车间生产执行调度系统 - 人员工作日历
// ==========================================
// 职责: 每人每天的 work/break 时段
// 说明: 日历由人员/公司配置维护, 排程引擎只读
// ==========================================

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::types::BlockType;

/// 日内时段 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBlock {
    pub block_type: BlockType,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ScheduleBlock {
    pub fn work(start: NaiveTime, end: NaiveTime) -> Self {
        Self { block_type: BlockType::Work, start, end }
    }

    pub fn rest(start: NaiveTime, end: NaiveTime) -> Self {
        Self { block_type: BlockType::Break, start, end }
    }

    pub fn is_work(&self) -> bool {
        self.block_type == BlockType::Work
    }

    /// 时刻是否落在时段内（左闭右开）
    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// 日历提供者
///
/// 排程引擎通过此接口读取人员某天的时段
pub trait CalendarProvider: Send + Sync {
    fn blocks_for(&self, worker_id: i64, date: NaiveDate) -> Vec<ScheduleBlock>;
}

// ==========================================
// WorkerCalendar - 单人周历
// ==========================================
// 按星期几 (0=周一 .. 6=周日) 存放时段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerCalendar {
    pub worker_id: i64,
    pub weekly: HashMap<u32, Vec<ScheduleBlock>>,
}

impl WorkerCalendar {
    pub fn new(worker_id: i64) -> Self {
        Self { worker_id, weekly: HashMap::new() }
    }

    /// 添加某个星期几的时段
    pub fn add_block(&mut self, weekday: u32, block: ScheduleBlock) {
        let blocks = self.weekly.entry(weekday).or_default();
        blocks.push(block);
        blocks.sort_by_key(|b| b.start);
    }

    /// 每天相同的时段（测试与默认班次用）
    pub fn every_day(worker_id: i64, blocks: Vec<ScheduleBlock>) -> Self {
        let mut cal = Self::new(worker_id);
        for weekday in 0..7 {
            for block in &blocks {
                cal.add_block(weekday, *block);
            }
        }
        cal
    }

    pub fn blocks_on(&self, date: NaiveDate) -> Vec<ScheduleBlock> {
        let weekday = date.weekday().num_days_from_monday();
        self.weekly.get(&weekday).cloned().unwrap_or_default()
    }
}

// ==========================================
// WorkerCalendars - 多人日历集合
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct WorkerCalendars {
    calendars: HashMap<i64, WorkerCalendar>,
}

impl WorkerCalendars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, calendar: WorkerCalendar) {
        self.calendars.insert(calendar.worker_id, calendar);
    }

    pub fn with(mut self, calendar: WorkerCalendar) -> Self {
        self.insert(calendar);
        self
    }

    pub fn len(&self) -> usize {
        self.calendars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calendars.is_empty()
    }
}

impl CalendarProvider for WorkerCalendars {
    fn blocks_for(&self, worker_id: i64, date: NaiveDate) -> Vec<ScheduleBlock> {
        self.calendars
            .get(&worker_id)
            .map(|c| c.blocks_on(date))
            .unwrap_or_default()
    }
}
