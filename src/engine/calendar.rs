// ==========================================
// 车间生产执行调度系统 - 日历吸附
// ==========================================
// 职责: 将最早可开工时刻推进到人员的下一个工作时段
// 规则:
// - 落在 work 时段内: 保持不变
// - 否则: 当天剩余的下一个 work 时段起点, 再往后逐日查找
// - 查找窗口内没有任何 work 时段: 不受日历约束, 原样返回
// - 任务一旦开工按墙钟连续计时, 不因 break 暂停
// ==========================================

use crate::domain::calendar::CalendarProvider;
use chrono::{Duration, NaiveDateTime};

/// 默认吸附查找天数
pub const DEFAULT_SNAP_HORIZON_DAYS: u32 = 14;

/// 将时刻吸附到人员的工作时段
///
/// # 参数
/// - `calendars`: 日历提供者
/// - `worker_id`: 人员; None 时不受日历约束
/// - `earliest`: 最早可开工时刻
/// - `horizon_days`: 向后查找的天数
pub fn snap_to_work(
    calendars: &dyn CalendarProvider,
    worker_id: Option<i64>,
    earliest: NaiveDateTime,
    horizon_days: u32,
) -> NaiveDateTime {
    let Some(worker_id) = worker_id else {
        return earliest;
    };

    let date = earliest.date();
    let time = earliest.time();

    let today: Vec<_> = calendars
        .blocks_for(worker_id, date)
        .into_iter()
        .filter(|b| b.is_work())
        .collect();

    if today.iter().any(|b| b.contains(time)) {
        return earliest;
    }
    if let Some(next) = today.iter().filter(|b| b.start > time).map(|b| b.start).min() {
        return date.and_time(next);
    }

    for offset in 1..=i64::from(horizon_days) {
        let day = date + Duration::days(offset);
        let first = calendars
            .blocks_for(worker_id, day)
            .into_iter()
            .filter(|b| b.is_work())
            .map(|b| b.start)
            .min();
        if let Some(start) = first {
            return day.and_time(start);
        }
    }

    tracing::trace!(worker_id, %earliest, "查找窗口内无工作时段, 不做日历吸附");
    earliest
}

/// 有效工时（分钟）换算为时长, 精确到秒
///
/// 非有限值、负值或超出时长表示范围时返回 None
pub fn duration_from_minutes(minutes: f64) -> Option<Duration> {
    let seconds = (minutes * 60.0).round();
    if !seconds.is_finite() || seconds < 0.0 || seconds >= i64::MAX as f64 {
        return None;
    }
    Duration::try_seconds(seconds as i64)
}

/// 开工时刻 + 有效工时, 任一步溢出返回 None
pub fn end_after(start: NaiveDateTime, minutes: f64) -> Option<NaiveDateTime> {
    start.checked_add_signed(duration_from_minutes(minutes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::calendar::{ScheduleBlock, WorkerCalendar, WorkerCalendars};
    use chrono::{NaiveDate, NaiveTime};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap().and_time(hm(h, m))
    }

    fn day_shift() -> WorkerCalendars {
        WorkerCalendars::new().with(WorkerCalendar::every_day(
            1,
            vec![ScheduleBlock::work(hm(8, 0), hm(17, 0))],
        ))
    }

    #[test]
    fn test_inside_block_stays() {
        let cals = day_shift();
        assert_eq!(snap_to_work(&cals, Some(1), at(2, 10, 0), 14), at(2, 10, 0));
    }

    #[test]
    fn test_after_hours_moves_to_next_morning() {
        let cals = day_shift();
        assert_eq!(snap_to_work(&cals, Some(1), at(2, 19, 0), 14), at(3, 8, 0));
        // 区间右开: 17:00 已不在时段内
        assert_eq!(snap_to_work(&cals, Some(1), at(2, 17, 0), 14), at(3, 8, 0));
    }

    #[test]
    fn test_before_hours_and_lunch_break() {
        let cals = WorkerCalendars::new().with(WorkerCalendar::every_day(
            1,
            vec![
                ScheduleBlock::work(hm(8, 0), hm(12, 0)),
                ScheduleBlock::rest(hm(12, 0), hm(13, 0)),
                ScheduleBlock::work(hm(13, 0), hm(17, 0)),
            ],
        ));
        assert_eq!(snap_to_work(&cals, Some(1), at(2, 6, 30), 14), at(2, 8, 0));
        assert_eq!(snap_to_work(&cals, Some(1), at(2, 12, 15), 14), at(2, 13, 0));
    }

    #[test]
    fn test_skips_days_without_work() {
        // 2026-03-06 为周五, 只在周一 (weekday 0) 上班
        let mut cal = WorkerCalendar::new(1);
        cal.add_block(0, ScheduleBlock::work(hm(9, 0), hm(18, 0)));
        let cals = WorkerCalendars::new().with(cal);
        assert_eq!(snap_to_work(&cals, Some(1), at(6, 10, 0), 14), at(9, 9, 0));
    }

    #[test]
    fn test_no_calendar_uses_raw_time() {
        let cals = day_shift();
        assert_eq!(snap_to_work(&cals, Some(99), at(2, 19, 0), 14), at(2, 19, 0));
        assert_eq!(snap_to_work(&cals, None, at(2, 19, 0), 14), at(2, 19, 0));
    }

    #[test]
    fn test_duration_rounds_to_seconds() {
        assert_eq!(duration_from_minutes(70.588_235), Some(Duration::seconds(4235)));
        assert_eq!(duration_from_minutes(60.0), Some(Duration::minutes(60)));
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        // 60 / 1e-300 分钟
        assert_eq!(duration_from_minutes(6e301), None);
        assert_eq!(duration_from_minutes(f64::INFINITY), None);
        assert_eq!(duration_from_minutes(f64::NAN), None);
        assert_eq!(duration_from_minutes(-1.0), None);

        // 时长可表示但结束时刻越界
        assert!(duration_from_minutes(5e11).is_some());
        assert_eq!(end_after(at(2, 8, 0), 5e11), None);
        assert_eq!(end_after(at(2, 8, 0), 90.0), Some(at(2, 9, 30)));
    }
}
