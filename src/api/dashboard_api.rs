// ==========================================
// 血液供应匹配引擎 - 仪表盘 API
// ==========================================
// 职责: 血库库存快照, 血库概览, 附近血库搜索, 受血者请求列表, 低库存告警
// 只读: 不预留、不提交库存
// ==========================================

use crate::api::error::ApiResult;
use crate::api::validator;
use crate::domain::blood_bank::BloodBank;
use crate::domain::request::BloodRequest;
use crate::domain::types::{BloodType, DonationStatus, StockLevel};
use crate::engine::compatibility::compatible_donors;
use crate::engine::ledger::{InventoryLedger, InventorySnapshot};
use crate::repository::{BloodRequestRepository, DonationRepository};
use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// 附近血库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyBank {
    pub bank: BloodBank,
    pub distance_km: f64,
    /// 按 UTC 时间判断
    pub open_now: bool,
    /// 指定血型时为可供该血型的相容库存合计, 否则为全部库存
    pub compatible_available: u32,
}

/// 低库存告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAlert {
    pub bank_id: String,
    pub bank_name: String,
    pub blood_type: BloodType,
    pub available: u32,
    pub stock_level: StockLevel,
}

/// 血库概览（血库管理员首页）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankSummary {
    pub bank_id: String,
    pub bank_name: String,
    /// 在库单位数 = 可用 + 预留
    pub total_units: u32,
    pub available_units: u32,
    pub reserved_units: u32,
    pub critical_types: Vec<BloodType>,
    pub low_types: Vec<BloodType>,
    /// 有未取消预约的献血者数
    pub active_donors: usize,
    /// 当月（UTC）已完成献血次数
    pub donations_this_month: usize,
}

impl BankSummary {
    pub fn critical_type_count(&self) -> usize {
        self.critical_types.len()
    }
}

pub struct DashboardApi {
    ledger: Arc<InventoryLedger>,
    request_repo: Arc<dyn BloodRequestRepository>,
    donation_repo: Arc<dyn DonationRepository>,
}

impl DashboardApi {
    pub fn new(
        ledger: Arc<InventoryLedger>,
        request_repo: Arc<dyn BloodRequestRepository>,
        donation_repo: Arc<dyn DonationRepository>,
    ) -> Self {
        Self {
            ledger,
            request_repo,
            donation_repo,
        }
    }

    /// 单个血库的全血型库存
    pub async fn bank_inventory(&self, bank_id: &str, now: DateTime<Utc>) -> ApiResult<InventorySnapshot> {
        Ok(self.ledger.snapshot(bank_id, now).await?)
    }

    /// 全部血库库存（按血库 ID 升序）
    pub async fn all_inventories(&self, now: DateTime<Utc>) -> ApiResult<Vec<InventorySnapshot>> {
        let mut snapshots = Vec::new();
        for bank in self.ledger.banks() {
            snapshots.push(self.ledger.snapshot(&bank.id, now).await?);
        }
        Ok(snapshots)
    }

    /// 单个血库概览: 库存合计、告警血型、献血活动
    pub async fn bank_summary(&self, bank_id: &str, now: DateTime<Utc>) -> ApiResult<BankSummary> {
        let snapshot = self.ledger.snapshot(bank_id, now).await?;
        let donations = self.donation_repo.list_by_bank(bank_id).await?;

        let reserved_units: u32 = snapshot.items.iter().map(|i| i.reserved).sum();
        let low_types = snapshot
            .items
            .iter()
            .filter(|i| i.stock_level == StockLevel::Low)
            .map(|i| i.blood_type)
            .collect();
        let active_donors = donations
            .iter()
            .filter(|d| d.status != DonationStatus::Cancelled)
            .map(|d| d.donor_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let donations_this_month = donations
            .iter()
            .filter_map(|d| d.donated_at())
            .filter(|t| t.year() == now.year() && t.month() == now.month())
            .count();

        Ok(BankSummary {
            bank_id: snapshot.bank_id,
            bank_name: snapshot.bank_name,
            total_units: snapshot.total_available + reserved_units,
            available_units: snapshot.total_available,
            reserved_units,
            critical_types: snapshot.critical_types,
            low_types,
            active_donors,
            donations_this_month,
        })
    }

    /// 搜索附近血库
    ///
    /// # 参数
    /// - `lat` / `lng`: 搜索中心
    /// - `radius_km`: 搜索半径, None 使用默认 10 千米
    /// - `blood_type`: 可选, 指定时只统计可供该血型的相容库存
    ///
    /// # 返回
    /// 半径内的血库, 按距离升序
    pub async fn nearby_banks(
        &self,
        lat: f64,
        lng: f64,
        radius_km: Option<f64>,
        blood_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> ApiResult<Vec<NearbyBank>> {
        let center = validator::validate_coordinates(lat, lng)?;
        let radius = validator::validate_radius(radius_km)?;
        let donors: Vec<BloodType> = match blood_type {
            Some(raw) => compatible_donors(validator::parse_blood_type(raw)?),
            None => BloodType::ALL.to_vec(),
        };

        let mut result = Vec::new();
        for bank in self.ledger.banks() {
            let distance_km = bank.distance_from(&center);
            if distance_km > radius {
                continue;
            }
            let mut compatible_available = 0;
            for donor in &donors {
                compatible_available += self.ledger.available(&bank.id, *donor, now).await?;
            }
            let open_now = bank.operating_hours.is_open_at(now.time());
            result.push(NearbyBank {
                bank,
                distance_km,
                open_now,
                compatible_available,
            });
        }

        result.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.bank.id.cmp(&b.bank.id))
        });
        debug!(radius_km = radius, found = result.len(), "附近血库搜索完成");
        Ok(result)
    }

    /// 某受血者的全部请求（按提交时间降序）
    pub async fn recipient_requests(&self, recipient_id: &str) -> ApiResult<Vec<BloodRequest>> {
        let recipient_id = validator::require_non_empty("recipient_id", recipient_id)?;
        Ok(self.request_repo.list_by_recipient(&recipient_id).await?)
    }

    /// 全部血库中处于 critical 的血型（按血库 ID、相容广度顺序）
    pub async fn critical_alerts(&self, now: DateTime<Utc>) -> ApiResult<Vec<StockAlert>> {
        let mut alerts = Vec::new();
        for snapshot in self.all_inventories(now).await? {
            for item in &snapshot.items {
                if item.stock_level == StockLevel::Critical {
                    alerts.push(StockAlert {
                        bank_id: snapshot.bank_id.clone(),
                        bank_name: snapshot.bank_name.clone(),
                        blood_type: item.blood_type,
                        available: item.available,
                        stock_level: item.stock_level,
                    });
                }
            }
        }
        Ok(alerts)
    }
}
