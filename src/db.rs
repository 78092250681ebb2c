// ==========================================
// 车间生产执行调度系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 统一建表入口，计划/节点/工单/关系为独立关系表
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
///
/// 超时后操作直接失败返回调用方，不在核心内重试
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并初始化 schema（单元测试用）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS production_plan (
            plan_id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            target_quantity REAL NOT NULL,
            default_efficiency REAL NOT NULL CHECK (default_efficiency > 0 AND default_efficiency <= 1),
            planned_start TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            released_at TEXT,
            launched_at TEXT,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS plan_node (
            node_id INTEGER PRIMARY KEY AUTOINCREMENT,
            plan_id INTEGER NOT NULL REFERENCES production_plan(plan_id) ON DELETE CASCADE,
            operation_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            nominal_time_min REAL NOT NULL,
            efficiency REAL,
            assignment_mode TEXT NOT NULL,
            assigned_worker_id INTEGER,
            scheduling_mode TEXT NOT NULL,
            urgent INTEGER NOT NULL DEFAULT 0,
            sequence_order INTEGER NOT NULL DEFAULT 0,
            unit_count INTEGER NOT NULL DEFAULT 1,
            output_material_code TEXT,
            output_quantity REAL NOT NULL DEFAULT 1,
            material_inputs_json TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_plan_node_plan ON plan_node(plan_id);

        CREATE TABLE IF NOT EXISTS entity_relation (
            relation_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_type TEXT NOT NULL,
            source_id INTEGER NOT NULL,
            relation_type TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id INTEGER NOT NULL,
            priority INTEGER,
            created_at TEXT NOT NULL,
            UNIQUE (source_type, source_id, relation_type, target_id)
        );
        CREATE INDEX IF NOT EXISTS idx_entity_relation_reverse
            ON entity_relation(relation_type, target_id);

        CREATE TABLE IF NOT EXISTS worker_assignment (
            assignment_id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            plan_id INTEGER NOT NULL REFERENCES production_plan(plan_id) ON DELETE CASCADE,
            node_id INTEGER NOT NULL REFERENCES plan_node(node_id),
            unit_index INTEGER NOT NULL DEFAULT 1,
            worker_id INTEGER,
            station_id INTEGER,
            substation_ids_json TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            scheduling_mode TEXT NOT NULL,
            urgent INTEGER NOT NULL DEFAULT 0,
            sequence_number INTEGER,
            nominal_time_min REAL NOT NULL,
            effective_time_min REAL NOT NULL,
            efficiency_override REAL,
            planned_output_quantity REAL NOT NULL,
            actual_output_quantity REAL,
            output_material_code TEXT,
            materials_required_json TEXT NOT NULL DEFAULT '[]',
            materials_reserved_json TEXT NOT NULL DEFAULT '[]',
            materials_consumed_json TEXT NOT NULL DEFAULT '[]',
            material_reservation_status TEXT NOT NULL DEFAULT 'NONE',
            estimated_start TEXT,
            estimated_end TEXT,
            optimized_start TEXT,
            optimized_end TEXT,
            started_at TEXT,
            completed_at TEXT,
            cancel_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_assignment_worker ON worker_assignment(worker_id, status);
        CREATE INDEX IF NOT EXISTS idx_assignment_station ON worker_assignment(station_id, status);
        CREATE INDEX IF NOT EXISTS idx_assignment_plan ON worker_assignment(plan_id);

        CREATE TABLE IF NOT EXISTS worker_schedule_block (
            block_id INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_id INTEGER NOT NULL,
            weekday INTEGER NOT NULL CHECK (weekday BETWEEN 0 AND 6),
            block_type TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_schedule_block_worker ON worker_schedule_block(worker_id);

        CREATE TABLE IF NOT EXISTS material_stock (
            material_code TEXT PRIMARY KEY,
            on_hand REAL NOT NULL DEFAULT 0,
            reserved REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS material_reservation (
            reservation_id TEXT PRIMARY KEY,
            material_code TEXT NOT NULL REFERENCES material_stock(material_code),
            quantity REAL NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            closed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS material_ledger_entry (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            material_code TEXT NOT NULL,
            entry_type TEXT NOT NULL,
            quantity REAL NOT NULL,
            reservation_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS code_sequence (
            scope_key TEXT PRIMARY KEY,
            last_value INTEGER NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}
