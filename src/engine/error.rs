// ==========================================
// 车间生产执行调度系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: 校验/排程错误在任何状态变更之前返回
// ==========================================

use crate::domain::types::AssignmentStatus;
use crate::engine::graph::{PlanValidationError, ValidationErrorKind};
use crate::engine::ledger::LedgerError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 计划图 =====
    #[error("计划校验失败: {}", summarize(.0))]
    Validation(Vec<PlanValidationError>),

    #[error("前置关系存在环: {cycle:?}")]
    CyclicDependency { cycle: Vec<i64> },

    // ===== 排程 =====
    #[error("节点无法排程: node_id={node_id}, reason={reason}")]
    UnschedulableNode { node_id: i64, reason: String },

    // ===== 工单生命周期 =====
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

    #[error("物料台账错误: {0}")]
    Ledger(String),

    // ===== 数据访问 =====
    #[error("关系已存在且参数不同: {0}")]
    DuplicateRelation(String),

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("队列锁获取失败: {0}")]
    LockError(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl EngineError {
    /// 将校验结果折叠为错误; 存在环时优先报告环
    pub fn from_validation_errors(errors: Vec<PlanValidationError>) -> Self {
        if let Some(cycle) = errors
            .iter()
            .find(|e| e.kind == ValidationErrorKind::CyclicDependency)
        {
            return EngineError::CyclicDependency {
                cycle: cycle.cycle.clone(),
            };
        }
        EngineError::Validation(errors)
    }

    pub fn invalid_transition(from: AssignmentStatus, event: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidTransition {
            from: from.to_string(),
            event: event.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

fn summarize(errors: &[PlanValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

// 仓储层业务错误提升为引擎层对应分类
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            RepositoryError::DuplicateRelation(msg) => EngineError::DuplicateRelation(msg),
            RepositoryError::InsufficientStock {
                material_code,
                requested,
                available,
            } => EngineError::InsufficientStock {
                material_code,
                requested,
                available,
            },
            RepositoryError::InvalidStateTransition { from, to } => EngineError::InvalidTransition {
                from,
                event: to,
                reason: "当前状态不允许该迁移".to_string(),
            },
            other => EngineError::Repository(other),
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock {
                material_code,
                requested,
                available,
            } => EngineError::InsufficientStock {
                material_code,
                requested,
                available,
            },
            LedgerError::Repository(e) => EngineError::from(e),
            other => EngineError::Ledger(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
