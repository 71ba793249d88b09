// ==========================================
// 库存台账 - 血库库存快照（仪表盘读模型）
// ==========================================

use super::core::{InventoryLedger, StockKey};
use crate::domain::types::{BloodType, StockLevel};
use crate::engine::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个血型的库存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub blood_type: BloodType,
    /// 可用（未预留）单位数
    pub available: u32,
    /// pending 预留占用的单位数
    pub reserved: u32,
    pub batch_count: usize,
    pub earliest_expiry: Option<DateTime<Utc>>,
    pub stock_level: StockLevel,
}

/// 单个血库的全血型库存快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub bank_id: String,
    pub bank_name: String,
    pub generated_at: DateTime<Utc>,
    /// 固定 8 种血型, 按 `BloodType::ALL` 顺序
    pub items: Vec<InventoryItem>,
    pub total_available: u32,
    pub critical_types: Vec<BloodType>,
}

impl InventorySnapshot {
    pub fn item(&self, blood_type: BloodType) -> Option<&InventoryItem> {
        self.items.iter().find(|i| i.blood_type == blood_type)
    }
}

impl InventoryLedger {
    /// 生成血库库存快照（先做惰性清理）
    pub async fn snapshot(&self, bank_id: &str, now: DateTime<Utc>) -> EngineResult<InventorySnapshot> {
        let bank = self
            .bank(bank_id)
            .ok_or_else(|| EngineError::UnknownBank(bank_id.to_string()))?;

        let mut items = Vec::with_capacity(BloodType::ALL.len());
        for blood_type in BloodType::ALL {
            let key = StockKey::new(bank_id, blood_type);
            let existing = self
                .entries
                .read()
                .map_err(|e| EngineError::Internal(format!("锁获取失败: {}", e)))?
                .get(&key)
                .cloned();

            let item = match existing {
                Some(entry) => {
                    let mut guard = self.lock_entry(&key, entry).await?;
                    self.housekeep(&key, &mut guard, now).await;
                    let available = guard.available();
                    InventoryItem {
                        blood_type,
                        available,
                        reserved: guard.reserved(),
                        batch_count: guard.batches.len(),
                        earliest_expiry: guard.earliest_expiry(),
                        stock_level: self.thresholds().classify(available),
                    }
                }
                None => InventoryItem {
                    blood_type,
                    available: 0,
                    reserved: 0,
                    batch_count: 0,
                    earliest_expiry: None,
                    stock_level: self.thresholds().classify(0),
                },
            };
            items.push(item);
        }

        let total_available = items.iter().map(|i| i.available).sum();
        let critical_types = items
            .iter()
            .filter(|i| i.stock_level == StockLevel::Critical)
            .map(|i| i.blood_type)
            .collect();

        Ok(InventorySnapshot {
            bank_id: bank.id,
            bank_name: bank.name,
            generated_at: now,
            items,
            total_available,
            critical_types,
        })
    }
}
