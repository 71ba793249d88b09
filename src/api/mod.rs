// ==========================================
// 血液供应匹配引擎 - API 层
// ==========================================
// 职责: 输入校验 + 引擎调用 + 错误转换, 供上层界面调用
// ==========================================

pub mod config_api;
pub mod dashboard_api;
pub mod donation_api;
pub mod error;
pub mod request_api;
pub mod validator;

// 重导出核心类型
pub use config_api::{ConfigApi, ConfigItem};
pub use dashboard_api::{BankSummary, DashboardApi, NearbyBank, StockAlert};
pub use donation_api::{DonationApi, ScheduleDonationInput};
pub use error::{ApiError, ApiResult};
pub use request_api::{RequestApi, SubmitRequestInput};
