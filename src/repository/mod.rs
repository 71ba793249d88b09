// ==========================================
// 血液供应匹配引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod bank_repo;
pub mod donation_repo;
pub mod error;
pub mod inventory_repo;
pub mod memory_repo;
pub mod request_repo;

// 重导出核心仓储
pub use bank_repo::{BloodBankRepository, BloodBankRepositoryImpl};
pub use donation_repo::{DonationRepository, DonationRepositoryImpl};
pub use error::{RepositoryError, RepositoryResult};
pub use inventory_repo::{InventoryRepository, InventoryRepositoryImpl};
pub use memory_repo::{
    InMemoryBloodBankRepository, InMemoryBloodRequestRepository, InMemoryDonationRepository,
    InMemoryInventoryRepository,
};
pub use request_repo::{BloodRequestRepository, BloodRequestRepositoryImpl};
