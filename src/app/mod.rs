// ==========================================
// 血液供应匹配引擎 - 应用层
// ==========================================
// 职责: 组装数据库、配置、引擎与 API, 供可执行程序使用
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
