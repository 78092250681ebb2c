// ==========================================
// 车间生产执行调度系统 - 物料台账接口
// ==========================================
// 职责: 定义台账操作（不含实现）与工单迁移的台账动作
// 实现者: repository::SqliteMaterialLedger
// 红线: 消耗为追加记录, 不回滚已消耗物料
// 红线: 工单迁移的台账动作与工单行在同一事务内落库
// ==========================================

use crate::domain::assignment::MaterialRequirement;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 台账错误
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("库存不足: material={material_code}, requested={requested}, available={available}")]
    InsufficientStock {
        material_code: String,
        requested: f64,
        available: f64,
    },

    #[error("预留不存在: {0}")]
    ReservationNotFound(String),

    #[error("预留已关闭: reservation_id={reservation_id}, status={status}")]
    ReservationClosed { reservation_id: String, status: String },

    #[error("数量无效: {0}")]
    InvalidQuantity(f64),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// 一次预留请求
#[derive(Debug, Clone, PartialEq)]
pub struct ReserveRequest {
    pub material_code: String,
    pub quantity: f64,
}

/// 完工结算中的一笔消耗
#[derive(Debug, Clone, PartialEq)]
pub struct Consumption {
    pub reservation_id: String,
    pub quantity: f64,
}

/// 带预分配ID的预留
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedReservation {
    pub reservation_id: String,
    pub material_code: String,
    pub quantity: f64,
}

/// 一次工单迁移需要落库的台账动作
///
/// 执行顺序: 预留 → 消耗 → 释放 → 入库
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerEffects {
    pub reserve: Vec<PlannedReservation>,
    pub consume: Vec<Consumption>,
    pub release: Vec<String>,
    pub credit: Option<(String, f64)>,
}

impl LedgerEffects {
    pub fn is_empty(&self) -> bool {
        self.reserve.is_empty() && self.consume.is_empty() && self.release.is_empty() && self.credit.is_none()
    }
}

// ==========================================
// MaterialLedger Trait
// ==========================================
pub trait MaterialLedger: Send + Sync {
    /// 检查并预留, 返回预留ID
    fn reserve(&self, material_code: &str, quantity: f64) -> LedgerResult<String>;

    /// 按实际用量消耗预留
    fn consume(&self, reservation_id: &str, actual_quantity: f64) -> LedgerResult<()>;

    /// 释放预留
    fn release(&self, reservation_id: &str) -> LedgerResult<()>;

    /// 入库
    fn credit(&self, material_code: &str, quantity: f64) -> LedgerResult<()>;

    /// 批量预留（全部成功或全部不生效）
    ///
    /// 默认实现逐条预留, 失败时释放已成功的部分; 实现者可用单事务覆盖
    fn reserve_all(&self, requests: &[ReserveRequest]) -> LedgerResult<Vec<String>> {
        let mut reserved = Vec::with_capacity(requests.len());
        for req in requests {
            match self.reserve(&req.material_code, req.quantity) {
                Ok(id) => reserved.push(id),
                Err(e) => {
                    for id in &reserved {
                        if let Err(release_err) = self.release(id) {
                            tracing::error!(reservation_id = %id, error = %release_err, "补偿释放失败");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(reserved)
    }

    /// 完工结算: 消耗全部预留并入库产出
    fn settle(&self, consumptions: &[Consumption], output: Option<(&str, f64)>) -> LedgerResult<()> {
        for c in consumptions {
            self.consume(&c.reservation_id, c.quantity)?;
        }
        if let Some((code, qty)) = output {
            self.credit(code, qty)?;
        }
        Ok(())
    }
}

/// 计算按效率折算的实际消耗量
///
/// 消耗量 = 单位投入 × 实际产出 / 节点效率覆盖值
/// 无覆盖值时不折算
pub fn consumption_quantity(
    requirement: &MaterialRequirement,
    actual_output: f64,
    efficiency_override: Option<f64>,
) -> f64 {
    let factor = efficiency_override.filter(|e| *e > 0.0).unwrap_or(1.0);
    requirement.quantity_per_unit * actual_output / factor
}
