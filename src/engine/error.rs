// ==========================================
// 血液供应匹配引擎 - 引擎层错误类型
// ==========================================
// 可恢复: InsufficientStock / LockTimeout (触发重试或重新排队)
// 对外暴露: Unfulfillable (重试耗尽后由调度器上报)
// 内部: ReservationExpired (触发自动释放并记录日志)
// 调用方错误: InvalidBloodType / Validation (立即拒绝, 不重试)
// ==========================================

use crate::domain::types::{BloodType, InvalidBloodType, ReservationState};
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 库存台账 =====
    #[error("库存不足: bank={bank_id}, type={blood_type}, requested={requested}, available={available}")]
    InsufficientStock {
        bank_id: String,
        blood_type: BloodType,
        requested: u32,
        available: u32,
    },

    #[error("预留已超时: reservation_id={0}")]
    ReservationExpired(String),

    #[error("预留不存在: reservation_id={0}")]
    ReservationNotFound(String),

    #[error("预留状态不允许该操作: reservation_id={id}, state={state}")]
    InvalidReservationState { id: String, state: ReservationState },

    #[error("库存锁等待超时: bank={bank_id}, type={blood_type}")]
    LockTimeout { bank_id: String, blood_type: BloodType },

    #[error("血库未注册: {0}")]
    UnknownBank(String),

    // ===== 分配规划 =====
    #[error("无法满足请求: request_id={request_id}, requested={requested}, reachable={reachable}")]
    Unfulfillable {
        request_id: String,
        requested: u32,
        reachable: u32,
    },

    // ===== 调度 / 状态机 =====
    #[error("用血请求不存在: {0}")]
    RequestNotFound(String),

    #[error("献血预约不存在: {0}")]
    DonationNotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ===== 调用方错误 =====
    #[error(transparent)]
    InvalidBloodType(#[from] InvalidBloodType),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // ===== 存储 =====
    #[error("存储错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl EngineError {
    /// 是否值得在下一个调度周期重试
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::InvalidBloodType(_)
                | EngineError::Validation(_)
                | EngineError::InvalidStateTransition { .. }
                | EngineError::RequestNotFound(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
