// ==========================================
// 车间生产执行调度系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{ProductionApi, RelationApi};
use crate::config::{ConfigManager, ExecutionConfig};
use crate::db::{init_schema, open_sqlite_connection};
use crate::notify::NotificationBus;
use crate::repository::{
    AssignmentRepository, CodeSequenceRepository, PlanNodeRepository, PlanRepository,
    RelationRepository, SqliteMaterialLedger, WorkerCalendarRepository,
};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 生产执行API
    pub production_api: Arc<ProductionApi>,

    /// 关系维护API
    pub relation_api: Arc<RelationApi>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 物料台账
    pub ledger: Arc<SqliteMaterialLedger>,

    /// 人员日历仓储
    pub calendar_repo: Arc<WorkerCalendarRepository>,

    /// 变更通知总线
    pub bus: NotificationBus,

    /// 启动时读取的执行配置
    pub config: ExecutionConfig,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径（不存在时创建并建表）
    ///
    /// # 返回
    /// - Ok(AppState): 初始化成功
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        Self::from_connection(conn, db_path)
    }

    /// 基于已打开的连接装配（测试可传入内存库）
    pub fn from_connection(conn: Connection, db_path: String) -> Result<Self, String> {
        init_schema(&conn).map_err(|e| format!("数据库初始化失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let config = config_manager
            .load_execution_config()
            .map_err(|e| format!("读取执行配置失败: {}", e))?;
        tracing::info!(?config, "执行配置已加载");

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let plan_repo = Arc::new(PlanRepository::new(conn.clone()));
        let node_repo = Arc::new(PlanNodeRepository::new(conn.clone()));
        let assignment_repo = Arc::new(AssignmentRepository::new(conn.clone()));
        let relation_repo = Arc::new(RelationRepository::new(conn.clone()));
        let calendar_repo = Arc::new(WorkerCalendarRepository::new(conn.clone()));
        let sequence_repo = Arc::new(CodeSequenceRepository::new(conn.clone()));
        let ledger = Arc::new(SqliteMaterialLedger::new(conn));

        // ==========================================
        // 通知总线与API
        // ==========================================
        let bus = NotificationBus::new(config.subscriber_buffer);

        let production_api = Arc::new(ProductionApi::new(
            plan_repo,
            node_repo,
            assignment_repo,
            relation_repo.clone(),
            calendar_repo.clone(),
            sequence_repo,
            config.clone(),
            bus.clone(),
        ));
        let relation_api = Arc::new(RelationApi::new(
            relation_repo,
            calendar_repo.clone(),
            Some(Arc::new(bus.clone())),
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            production_api,
            relation_api,
            config_manager,
            ledger,
            calendar_repo,
            bus,
            config,
        })
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// 默认数据库路径辅助函数
// ==========================================

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 SHOPFLOOR_DB 非空时使用该值
/// - 开发环境: 用户数据目录/shopfloor-exec-dev/shopfloor_exec.db
/// - 生产环境: 用户数据目录/shopfloor-exec/shopfloor_exec.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("SHOPFLOOR_DB") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./shopfloor_exec.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("shopfloor-exec-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("shopfloor-exec");
        }

        // 目录创建失败时由打开数据库报错
        std::fs::create_dir_all(&path).ok();
        path = path.join("shopfloor_exec.db");
    }

    path.to_string_lossy().to_string()
}
