// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、API 装配、固定时钟与常用日历
// ==========================================

#![allow(dead_code)]

use std::error::Error;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use shopfloor_exec::api::{ProductionApi, RelationApi};
use shopfloor_exec::config::ExecutionConfig;
use shopfloor_exec::db::{init_schema, open_sqlite_connection};
use shopfloor_exec::domain::calendar::{ScheduleBlock, WorkerCalendar};
use shopfloor_exec::domain::plan::NewPlan;
use shopfloor_exec::engine::events::ChangePublisher;
use shopfloor_exec::notify::NotificationBus;
use shopfloor_exec::repository::{
    AssignmentRepository, CodeSequenceRepository, PlanNodeRepository, PlanRepository,
    RelationRepository, SqliteMaterialLedger, WorkerCalendarRepository,
};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_string_lossy().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 测试基准时刻: 2026-03-02（周一）08:00
pub fn monday_at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

/// 每天 08:00-17:00 单一工作时段
pub fn day_shift(worker_id: i64) -> WorkerCalendar {
    WorkerCalendar::every_day(worker_id, vec![ScheduleBlock::work(hm(8, 0), hm(17, 0))])
}

pub fn new_plan(name: &str, default_efficiency: Option<f64>) -> NewPlan {
    NewPlan {
        code: None,
        name: name.to_string(),
        target_quantity: 10.0,
        default_efficiency,
        planned_start: None,
        created_by: "planner".to_string(),
    }
}

/// 测试环境
pub struct TestEnv {
    pub _temp_file: NamedTempFile,
    pub db_path: String,
    pub api: Arc<ProductionApi>,
    pub relations: RelationApi,
    pub ledger: Arc<SqliteMaterialLedger>,
    pub bus: NotificationBus,
}

/// 基于临时文件库装配 API, 时钟固定为 `now`
pub fn setup_env(now: NaiveDateTime) -> TestEnv {
    setup_env_with_publisher(now, None)
}

/// 同 `setup_env`, 但 ProductionApi 的变更发往 `publisher` 而非直接进入总线
pub fn setup_env_with_publisher(
    now: NaiveDateTime,
    publisher: Option<Arc<dyn ChangePublisher>>,
) -> TestEnv {
    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path).unwrap()));

    let relation_repo = Arc::new(RelationRepository::new(conn.clone()));
    let calendar_repo = Arc::new(WorkerCalendarRepository::new(conn.clone()));
    let ledger = Arc::new(SqliteMaterialLedger::new(conn.clone()));
    let bus = NotificationBus::new(64);

    let mut api = ProductionApi::new(
        Arc::new(PlanRepository::new(conn.clone())),
        Arc::new(PlanNodeRepository::new(conn.clone())),
        Arc::new(AssignmentRepository::new(conn.clone())),
        relation_repo.clone(),
        calendar_repo.clone(),
        Arc::new(CodeSequenceRepository::new(conn)),
        ExecutionConfig::default(),
        bus.clone(),
    )
    .with_clock(move || now);
    if let Some(p) = publisher {
        api = api.with_publisher(p);
    }

    let relations = RelationApi::new(relation_repo, calendar_repo, Some(Arc::new(bus.clone())));

    TestEnv {
        _temp_file: temp_file,
        db_path,
        api: Arc::new(api),
        relations,
        ledger,
        bus,
    }
}

/// 在测试库上执行一段 SQL（安装/移除触发器等）
pub fn exec_sql(env: &TestEnv, sql: &str) {
    let conn = open_sqlite_connection(&env.db_path).unwrap();
    conn.execute_batch(sql).unwrap();
}
