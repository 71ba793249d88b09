// ==========================================
// 血液供应匹配引擎 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合匹配引擎所需的所有 Repository
// 目标: 组件只依赖 trait 对象, SQLite 与内存实现可整体替换
// ==========================================

use std::sync::Arc;

use crate::repository::{
    BloodBankRepository, BloodRequestRepository, DonationRepository,
    InMemoryBloodBankRepository, InMemoryBloodRequestRepository, InMemoryDonationRepository,
    InMemoryInventoryRepository, InventoryRepository,
};

/// 匹配引擎仓储集合
///
/// # 包含的仓储
/// - `bank_repo`: 血库主数据
/// - `inventory_repo`: 批次库存（台账写穿目标）
/// - `request_repo`: 用血请求
/// - `donation_repo`: 献血预约
#[derive(Clone)]
pub struct MatchingRepositories {
    pub bank_repo: Arc<dyn BloodBankRepository>,
    pub inventory_repo: Arc<dyn InventoryRepository>,
    pub request_repo: Arc<dyn BloodRequestRepository>,
    pub donation_repo: Arc<dyn DonationRepository>,
}

impl MatchingRepositories {
    pub fn new(
        bank_repo: Arc<dyn BloodBankRepository>,
        inventory_repo: Arc<dyn InventoryRepository>,
        request_repo: Arc<dyn BloodRequestRepository>,
        donation_repo: Arc<dyn DonationRepository>,
    ) -> Self {
        Self {
            bank_repo,
            inventory_repo,
            request_repo,
            donation_repo,
        }
    }

    /// 全内存仓储（测试 / 演示）
    pub fn in_memory() -> Self {
        Self {
            bank_repo: Arc::new(InMemoryBloodBankRepository::new()),
            inventory_repo: Arc::new(InMemoryInventoryRepository::new()),
            request_repo: Arc::new(InMemoryBloodRequestRepository::new()),
            donation_repo: Arc::new(InMemoryDonationRepository::new()),
        }
    }
}
