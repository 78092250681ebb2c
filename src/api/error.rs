// ==========================================
// 车间生产执行调度系统 - API层错误类型
// ==========================================
// 职责: 将 Engine/Repository 错误转换为调用方可读的错误
// 约定: 所有错误信息必须包含显式原因; 不在核心内重试
// ==========================================

use crate::engine::error::EngineError;
use crate::engine::graph::PlanValidationError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 计划图 / 排程错误
    // ==========================================
    #[error("计划校验失败: {reason}")]
    PlanValidationFailed {
        reason: String,
        violations: Vec<ValidationViolation>,
    },

    #[error("前置关系存在环: {cycle:?}")]
    CyclicDependency { cycle: Vec<i64> },

    #[error("节点无法排程: node_id={node_id}, reason={reason}")]
    UnschedulableNode { node_id: i64, reason: String },

    // ==========================================
    // 生命周期错误
    // ==========================================
    #[error("库存不足: material={material_code}, requested={requested}, available={available}")]
    InsufficientStock {
        material_code: String,
        requested: f64,
        available: f64,
    },

    #[error("无效的状态转换: from={from}, event={event}, reason={reason}")]
    InvalidTransition {
        from: String,
        event: String,
        reason: String,
    },

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("关系已存在且参数不同: {0}")]
    DuplicateRelation(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库繁忙超时: {0}")]
    Timeout(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::Timeout(msg) => ApiError::Timeout(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }

            // 业务规则错误
            RepositoryError::DuplicateRelation(msg) => ApiError::DuplicateRelation(msg),
            RepositoryError::InsufficientStock {
                material_code,
                requested,
                available,
            } => ApiError::InsufficientStock {
                material_code,
                requested,
                available,
            },
            RepositoryError::InvalidStateTransition { from, to } => ApiError::InvalidTransition {
                from,
                event: to,
                reason: "当前状态不允许该迁移".to_string(),
            },

            // 数据质量错误
            RepositoryError::ValidationError(msg) => ApiError::InvalidInput(msg),
            RepositoryError::Serialization { field, message } => {
                ApiError::InternalError(format!("字段{}序列化失败: {}", field, message))
            }

            // 通用错误
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(errors) => {
                let violations: Vec<ValidationViolation> =
                    errors.iter().map(ValidationViolation::from).collect();
                ApiError::PlanValidationFailed {
                    reason: format!("{}项校验未通过", violations.len()),
                    violations,
                }
            }
            EngineError::CyclicDependency { cycle } => ApiError::CyclicDependency { cycle },
            EngineError::UnschedulableNode { node_id, reason } => {
                ApiError::UnschedulableNode { node_id, reason }
            }
            EngineError::InsufficientStock {
                material_code,
                requested,
                available,
            } => ApiError::InsufficientStock {
                material_code,
                requested,
                available,
            },
            EngineError::InvalidTransition { from, event, reason } => {
                ApiError::InvalidTransition { from, event, reason }
            }
            EngineError::Ledger(msg) => ApiError::BusinessRuleViolation(msg),
            EngineError::DuplicateRelation(msg) => ApiError::DuplicateRelation(msg),
            EngineError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            EngineError::LockError(msg) => ApiError::InternalError(msg),
            EngineError::Repository(e) => ApiError::from(e),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

// ==========================================
// 校验违规详情
// ==========================================
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationViolation {
    /// 违规类型（DUPLICATE_ID / UNKNOWN_PREDECESSOR / ...）
    pub violation_type: String,
    pub node_id: Option<i64>,
    pub reason: String,
}

impl From<&PlanValidationError> for ValidationViolation {
    fn from(e: &PlanValidationError) -> Self {
        Self {
            violation_type: e.kind.to_string(),
            node_id: e.node_id,
            reason: e.message.clone(),
        }
    }
}
