// ==========================================
// 血液供应匹配引擎 - 核心库
// ==========================================
// 技术栈: Rust + Tokio + SQLite
// 系统定位: 献血协同平台的供需匹配内核
//           (库存台账 / 相容性 / 分配规划 / 请求调度)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 引擎参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{BloodType, DonationStatus, RequestStatus, StockLevel, Urgency};

// 领域实体
pub use domain::{
    AllocationPlan, AllocationSegment, BloodBank, BloodRequest, BloodUnit, DonationRecord,
    GeoPoint, OperatingHours, Reservation,
};

// 引擎
pub use engine::{
    AllocationPlanner, CycleReport, DonationService, EngineError, EngineResult, InventoryLedger,
    MatchingEngine, RequestScheduler,
};

// API
pub use api::{ApiError, ApiResult, DashboardApi, DonationApi, RequestApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "LifeBank 血液供应匹配引擎";
