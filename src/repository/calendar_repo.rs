// ==========================================
// 车间生产执行调度系统 - 人员日历仓储
// ==========================================
// 职责: worker_schedule_block 的读写, 组装 WorkerCalendars
// 说明: 日历由人员/公司配置维护, 排程引擎只读
// ==========================================

use crate::domain::calendar::{ScheduleBlock, WorkerCalendar, WorkerCalendars};
use crate::domain::types::BlockType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::enum_err;
use chrono::NaiveTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

const TIME_FORMAT: &str = "%H:%M";

// ==========================================
// WorkerCalendarRepository - 人员日历仓储
// ==========================================
pub struct WorkerCalendarRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WorkerCalendarRepository {
    /// 创建新的WorkerCalendarRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 替换某人某个星期几的全部时段
    ///
    /// # 参数
    /// - `weekday`: 0=周一 .. 6=周日
    pub fn replace_day(
        &self,
        worker_id: i64,
        weekday: u32,
        blocks: &[ScheduleBlock],
    ) -> RepositoryResult<()> {
        if weekday > 6 {
            return Err(RepositoryError::ValidationError(format!(
                "weekday 取值 0..=6, 实际 {}",
                weekday
            )));
        }
        for block in blocks {
            if block.start >= block.end {
                return Err(RepositoryError::ValidationError(format!(
                    "时段起止无效: {} - {}",
                    block.start, block.end
                )));
            }
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM worker_schedule_block WHERE worker_id = ?1 AND weekday = ?2",
            params![worker_id, weekday],
        )?;
        for block in blocks {
            tx.execute(
                r#"INSERT INTO worker_schedule_block (worker_id, weekday, block_type, start_time, end_time)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
                params![
                    worker_id,
                    weekday,
                    block.block_type.to_db_str(),
                    block.start.format(TIME_FORMAT).to_string(),
                    block.end.format(TIME_FORMAT).to_string(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// 保存整份周历（覆盖该人员已有时段）
    pub fn save_calendar(&self, calendar: &WorkerCalendar) -> RepositoryResult<()> {
        for weekday in 0..7u32 {
            let blocks = calendar.weekly.get(&weekday).cloned().unwrap_or_default();
            self.replace_day(calendar.worker_id, weekday, &blocks)?;
        }
        Ok(())
    }

    /// 读取单人周历
    pub fn load_for_worker(&self, worker_id: i64) -> RepositoryResult<WorkerCalendar> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT worker_id, weekday, block_type, start_time, end_time
               FROM worker_schedule_block
               WHERE worker_id = ?1
               ORDER BY weekday, start_time"#,
        )?;
        let rows = stmt
            .query_map(params![worker_id], map_block_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut calendar = WorkerCalendar::new(worker_id);
        for (_, weekday, block) in rows {
            calendar.add_block(weekday, block);
        }
        Ok(calendar)
    }

    /// 读取全部人员日历
    pub fn load_all(&self) -> RepositoryResult<WorkerCalendars> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT worker_id, weekday, block_type, start_time, end_time
               FROM worker_schedule_block
               ORDER BY worker_id, weekday, start_time"#,
        )?;
        let rows = stmt
            .query_map([], map_block_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_worker: std::collections::BTreeMap<i64, WorkerCalendar> = Default::default();
        for (worker_id, weekday, block) in rows {
            by_worker
                .entry(worker_id)
                .or_insert_with(|| WorkerCalendar::new(worker_id))
                .add_block(weekday, block);
        }

        let mut calendars = WorkerCalendars::new();
        for (_, calendar) in by_worker {
            calendars.insert(calendar);
        }
        Ok(calendars)
    }
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_block_row(row: &rusqlite::Row) -> rusqlite::Result<(i64, u32, ScheduleBlock)> {
    let block_type: String = row.get(2)?;
    let start: String = row.get(3)?;
    let end: String = row.get(4)?;
    Ok((
        row.get(0)?,
        row.get(1)?,
        ScheduleBlock {
            block_type: BlockType::from_str(&block_type).ok_or_else(|| enum_err(2, &block_type))?,
            start: parse_time(3, &start)?,
            end: parse_time(4, &end)?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::CalendarProvider;
    use chrono::NaiveDate;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_save_and_load_calendar() {
        let conn = crate::db::open_in_memory().unwrap();
        let repo = WorkerCalendarRepository::new(Arc::new(Mutex::new(conn)));

        let calendar = WorkerCalendar::every_day(
            7,
            vec![
                ScheduleBlock::work(hm(8, 0), hm(12, 0)),
                ScheduleBlock::rest(hm(12, 0), hm(13, 0)),
                ScheduleBlock::work(hm(13, 0), hm(17, 0)),
            ],
        );
        repo.save_calendar(&calendar).unwrap();

        let loaded = repo.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        // 2026-10-16 为周五
        let blocks = loaded.blocks_for(7, NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].is_work());
        assert_eq!(blocks[1].block_type, BlockType::Break);
        assert_eq!(blocks[2].end, hm(17, 0));
    }

    #[test]
    fn test_replace_day_rejects_bad_input() {
        let conn = crate::db::open_in_memory().unwrap();
        let repo = WorkerCalendarRepository::new(Arc::new(Mutex::new(conn)));

        assert!(repo.replace_day(1, 7, &[]).is_err());
        assert!(repo
            .replace_day(1, 0, &[ScheduleBlock::work(hm(17, 0), hm(8, 0))])
            .is_err());
        assert!(repo.load_for_worker(1).unwrap().weekly.is_empty());
    }
}
