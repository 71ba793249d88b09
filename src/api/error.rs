// ==========================================
// 血液供应匹配引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型, 将引擎/仓储错误转换为展示层可读的错误
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 调用方错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 供应错误
    // ==========================================
    /// 可达库存不足（已释放全部预留）
    #[error("血液供应不足: request_id={request_id}, requested={requested}, reachable={reachable}")]
    Unfulfillable {
        request_id: String,
        requested: u32,
        reachable: u32,
    },

    #[error("库存不可用: {0}")]
    StockUnavailable(String),

    /// 可稍后重试
    #[error("资源繁忙, 请稍后重试: {0}")]
    Busy(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
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

impl ApiError {
    /// 展示层是否可以提示用户重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Busy(_) | ApiError::StockUnavailable(_) | ApiError::DatabaseConnectionError(_)
        )
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::DatabaseError(format!("字段{}数据异常: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unfulfillable {
                request_id,
                requested,
                reachable,
            } => ApiError::Unfulfillable {
                request_id,
                requested,
                reachable,
            },
            e @ EngineError::InsufficientStock { .. } => ApiError::StockUnavailable(e.to_string()),
            e @ EngineError::LockTimeout { .. } => ApiError::Busy(e.to_string()),
            e @ (EngineError::ReservationExpired(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::InvalidReservationState { .. }) => {
                ApiError::BusinessRuleViolation(e.to_string())
            }
            EngineError::UnknownBank(id) => ApiError::NotFound(format!("血库(id={})不存在", id)),
            EngineError::RequestNotFound(id) => {
                ApiError::NotFound(format!("用血请求(id={})不存在", id))
            }
            EngineError::DonationNotFound(id) => {
                ApiError::NotFound(format!("献血预约(id={})不存在", id))
            }
            EngineError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            EngineError::InvalidBloodType(e) => ApiError::InvalidInput(e.to_string()),
            EngineError::Validation(msg) => ApiError::ValidationError(msg),
            EngineError::Repository(e) => ApiError::from(e),
            EngineError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BloodType;

    #[test]
    fn test_engine_error_mapping() {
        let err: ApiError = EngineError::LockTimeout {
            bank_id: "bb1".into(),
            blood_type: BloodType::OPos,
        }
        .into();
        assert!(matches!(err, ApiError::Busy(_)));
        assert!(err.is_retryable());

        let err: ApiError = EngineError::Unfulfillable {
            request_id: "r1".into(),
            requested: 4,
            reachable: 1,
        }
        .into();
        assert!(matches!(err, ApiError::Unfulfillable { reachable: 1, .. }));
        assert!(!err.is_retryable());

        let err: ApiError = EngineError::Repository(RepositoryError::NotFound {
            entity: "BloodRequest".into(),
            id: "r9".into(),
        })
        .into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_invalid_blood_type_is_input_error() {
        let parse_err = "Q+".parse::<BloodType>().unwrap_err();
        let err: ApiError = EngineError::from(parse_err).into();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }
}
