// ==========================================
// 血液供应匹配引擎 - 内存仓储实现
// ==========================================
// 用途: 单元测试 / 演示中替换 SQLite 仓储, 不改动组件内部
// 说明: 支持写入故障注入, 用于验证"存储不可用"时调度循环不中断
// ==========================================

use crate::domain::blood_bank::{BloodBank, BloodUnit};
use crate::domain::donation::DonationRecord;
use crate::domain::request::BloodRequest;
use crate::domain::types::RequestStatus;
use crate::repository::bank_repo::BloodBankRepository;
use crate::repository::donation_repo::DonationRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::inventory_repo::InventoryRepository;
use crate::repository::request_repo::BloodRequestRepository;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> RepositoryResult<MutexGuard<'_, T>> {
    m.lock().map_err(|e| RepositoryError::LockError(e.to_string()))
}

/// 写入故障开关
///
/// `always` 打开时所有写入失败; `budget` 为剩余可成功的写入次数,
/// 耗尽后所有写入失败（None 表示不限）
#[derive(Default)]
struct FailSwitch {
    always: AtomicBool,
    budget: Mutex<Option<usize>>,
}

impl FailSwitch {
    fn set(&self, fail: bool) {
        self.always.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> RepositoryResult<()> {
        self.check_writes(1)
    }

    /// 一次性占用 `writes` 次写入, 剩余次数不足则整体失败
    fn check_writes(&self, writes: usize) -> RepositoryResult<()> {
        if self.always.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut budget = lock(&self.budget)?;
        if let Some(left) = budget.as_mut() {
            if *left < writes {
                *left = 0;
                return Err(Self::unavailable());
            }
            *left -= writes;
        }
        Ok(())
    }

    fn unavailable() -> RepositoryError {
        RepositoryError::DatabaseConnectionError("存储不可用（注入故障）".to_string())
    }
}

// ==========================================
// 血库
// ==========================================
#[derive(Default)]
pub struct InMemoryBloodBankRepository {
    banks: Mutex<BTreeMap<String, BloodBank>>,
}

impl InMemoryBloodBankRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BloodBankRepository for InMemoryBloodBankRepository {
    async fn upsert_bank(&self, bank: &BloodBank) -> RepositoryResult<()> {
        lock(&self.banks)?.insert(bank.id.clone(), bank.clone());
        Ok(())
    }

    async fn find_bank(&self, bank_id: &str) -> RepositoryResult<Option<BloodBank>> {
        Ok(lock(&self.banks)?.get(bank_id).cloned())
    }

    async fn list_banks(&self) -> RepositoryResult<Vec<BloodBank>> {
        Ok(lock(&self.banks)?.values().cloned().collect())
    }
}

// ==========================================
// 批次
// ==========================================
#[derive(Default)]
pub struct InMemoryInventoryRepository {
    batches: Mutex<BTreeMap<String, BloodUnit>>,
    fail_writes: FailSwitch,
}

impl InMemoryInventoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    /// 前 `writes` 次写入成功, 之后所有写入失败
    pub fn fail_writes_after(&self, writes: usize) {
        if let Ok(mut budget) = self.fail_writes.budget.lock() {
            *budget = Some(writes);
        }
    }

    /// 当前持久化的某批次数量（测试断言用）
    pub fn stored_quantity(&self, batch_id: &str) -> Option<u32> {
        self.batches
            .lock()
            .ok()
            .and_then(|b| b.get(batch_id).map(|u| u.quantity))
    }
}

#[async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn insert_batch(&self, unit: &BloodUnit) -> RepositoryResult<()> {
        self.fail_writes.check()?;
        let mut batches = lock(&self.batches)?;
        if batches.contains_key(&unit.batch_id) {
            return Err(RepositoryError::UniqueConstraintViolation(format!(
                "blood_unit.batch_id={}",
                unit.batch_id
            )));
        }
        batches.insert(unit.batch_id.clone(), unit.clone());
        Ok(())
    }

    async fn update_batch_quantity(&self, batch_id: &str, quantity: u32) -> RepositoryResult<()> {
        self.fail_writes.check()?;
        let mut batches = lock(&self.batches)?;
        match batches.get_mut(batch_id) {
            Some(unit) => {
                unit.quantity = quantity;
                Ok(())
            }
            None => Err(RepositoryError::NotFound {
                entity: "BloodUnit".to_string(),
                id: batch_id.to_string(),
            }),
        }
    }

    async fn delete_batch(&self, batch_id: &str) -> RepositoryResult<()> {
        self.fail_writes.check()?;
        lock(&self.batches)?.remove(batch_id);
        Ok(())
    }

    async fn apply_batch_quantities(&self, changes: &[(String, Option<u32>)]) -> RepositoryResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        // 与 SQLite 事务一致: 任一变更失败则全部不生效
        self.fail_writes.check_writes(changes.len())?;
        let mut batches = lock(&self.batches)?;
        if let Some((missing, _)) = changes.iter().find(|(id, _)| !batches.contains_key(id)) {
            return Err(RepositoryError::NotFound {
                entity: "BloodUnit".to_string(),
                id: missing.clone(),
            });
        }
        for (batch_id, quantity) in changes {
            match quantity {
                Some(quantity) => {
                    if let Some(unit) = batches.get_mut(batch_id) {
                        unit.quantity = *quantity;
                    }
                }
                None => {
                    batches.remove(batch_id);
                }
            }
        }
        Ok(())
    }

    async fn list_batches(&self) -> RepositoryResult<Vec<BloodUnit>> {
        Ok(lock(&self.batches)?.values().cloned().collect())
    }

    async fn list_batches_for_bank(&self, bank_id: &str) -> RepositoryResult<Vec<BloodUnit>> {
        Ok(lock(&self.batches)?
            .values()
            .filter(|u| u.bank_id == bank_id)
            .cloned()
            .collect())
    }
}

// ==========================================
// 用血请求
// ==========================================
#[derive(Default)]
pub struct InMemoryBloodRequestRepository {
    requests: Mutex<BTreeMap<String, BloodRequest>>,
    fail_writes: FailSwitch,
}

impl InMemoryBloodRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

#[async_trait]
impl BloodRequestRepository for InMemoryBloodRequestRepository {
    async fn upsert_request(&self, request: &BloodRequest) -> RepositoryResult<()> {
        self.fail_writes.check()?;
        lock(&self.requests)?.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn find_request(&self, request_id: &str) -> RepositoryResult<Option<BloodRequest>> {
        Ok(lock(&self.requests)?.get(request_id).cloned())
    }

    async fn list_by_status(&self, status: RequestStatus) -> RepositoryResult<Vec<BloodRequest>> {
        let mut list: Vec<BloodRequest> = lock(&self.requests)?
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.date_requested
                .cmp(&b.date_requested)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(list)
    }

    async fn list_by_recipient(&self, recipient_id: &str) -> RepositoryResult<Vec<BloodRequest>> {
        let mut list: Vec<BloodRequest> = lock(&self.requests)?
            .values()
            .filter(|r| r.recipient_id == recipient_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.date_requested
                .cmp(&a.date_requested)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(list)
    }
}

// ==========================================
// 献血预约
// ==========================================
#[derive(Default)]
pub struct InMemoryDonationRepository {
    donations: Mutex<BTreeMap<String, DonationRecord>>,
}

impl InMemoryDonationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, pred: impl Fn(&DonationRecord) -> bool) -> RepositoryResult<Vec<DonationRecord>> {
        let mut list: Vec<DonationRecord> = lock(&self.donations)?
            .values()
            .filter(|d| pred(d))
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.scheduled_date
                .cmp(&b.scheduled_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(list)
    }
}

#[async_trait]
impl DonationRepository for InMemoryDonationRepository {
    async fn upsert_donation(&self, donation: &DonationRecord) -> RepositoryResult<()> {
        lock(&self.donations)?.insert(donation.id.clone(), donation.clone());
        Ok(())
    }

    async fn find_donation(&self, donation_id: &str) -> RepositoryResult<Option<DonationRecord>> {
        Ok(lock(&self.donations)?.get(donation_id).cloned())
    }

    async fn list_by_donor(&self, donor_id: &str) -> RepositoryResult<Vec<DonationRecord>> {
        self.filtered(|d| d.donor_id == donor_id)
    }

    async fn list_by_bank(&self, bank_id: &str) -> RepositoryResult<Vec<DonationRecord>> {
        self.filtered(|d| d.bank_id == bank_id)
    }
}
