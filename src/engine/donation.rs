// ==========================================
// 血液供应匹配引擎 - 献血预约服务
// ==========================================
// 职责: 献血预约的生命周期管理
// 完成献血 = 向库存台账登记一个新批次
// 状态机: pending -> confirmed -> completed; pending | confirmed -> cancelled
// ==========================================

use crate::config::engine_config::DonationConfig;
use crate::domain::donation::{DonationRecord, DonorSummary};
use crate::domain::types::{BloodType, DonationStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::InventoryLedger;
use crate::repository::DonationRepository;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub struct DonationService {
    ledger: Arc<InventoryLedger>,
    donation_repo: Arc<dyn DonationRepository>,
    config: DonationConfig,
}

impl DonationService {
    pub fn new(
        ledger: Arc<InventoryLedger>,
        donation_repo: Arc<dyn DonationRepository>,
        config: DonationConfig,
    ) -> Self {
        Self {
            ledger,
            donation_repo,
            config,
        }
    }

    /// 预约献血
    #[instrument(skip(self, notes), fields(donor_id = %donor_id, bank_id = %bank_id))]
    pub async fn schedule(
        &self,
        donor_id: &str,
        bank_id: &str,
        blood_type: BloodType,
        units: u32,
        scheduled_date: DateTime<Utc>,
        notes: Option<String>,
    ) -> EngineResult<DonationRecord> {
        if donor_id.trim().is_empty() {
            return Err(EngineError::Validation("donor_id 不能为空".to_string()));
        }
        if units == 0 {
            return Err(EngineError::Validation("献血单位数必须大于 0".to_string()));
        }
        if self.ledger.bank(bank_id).is_none() {
            return Err(EngineError::UnknownBank(bank_id.to_string()));
        }

        // 献血间隔: 预约日期不得早于上次献血 + min_interval_days
        let history = self.donation_repo.list_by_donor(donor_id).await?;
        let summary =
            DonorSummary::from_records(donor_id, &history, self.config.min_interval_days, scheduled_date);
        if let Some(eligible_at) = summary.next_eligible_at {
            if scheduled_date < eligible_at {
                return Err(EngineError::Validation(format!(
                    "距上次献血不足 {} 天, 最早可预约: {}",
                    self.config.min_interval_days, eligible_at
                )));
            }
        }

        let record = DonationRecord {
            id: Uuid::new_v4().to_string(),
            donor_id: donor_id.to_string(),
            bank_id: bank_id.to_string(),
            blood_type,
            units,
            scheduled_date,
            status: DonationStatus::Pending,
            notes: notes.filter(|n| !n.trim().is_empty()),
            batch_id: None,
            completed_at: None,
        };
        self.donation_repo.upsert_donation(&record).await?;

        info!(donation_id = %record.id, scheduled_date = %scheduled_date, "献血预约已创建");
        Ok(record)
    }

    pub async fn confirm(&self, donation_id: &str) -> EngineResult<DonationRecord> {
        self.transition(donation_id, DonationStatus::Confirmed).await
    }

    pub async fn cancel(&self, donation_id: &str) -> EngineResult<DonationRecord> {
        self.transition(donation_id, DonationStatus::Cancelled).await
    }

    /// 完成献血并登记入库
    ///
    /// 批次过期时间 = now + shelf_life_days
    #[instrument(skip(self))]
    pub async fn complete(&self, donation_id: &str, now: DateTime<Utc>) -> EngineResult<DonationRecord> {
        let mut record = self.load(donation_id).await?;
        Self::check_transition(&record, DonationStatus::Completed)?;

        let expires_at = now + Duration::days(self.config.shelf_life_days);
        let batch = self
            .ledger
            .add_batch(&record.bank_id, record.blood_type, record.units, now, expires_at, now)
            .await?;

        record.status = DonationStatus::Completed;
        record.batch_id = Some(batch.batch_id.clone());
        record.completed_at = Some(now);
        if let Err(e) = self.donation_repo.upsert_donation(&record).await {
            // 批次已入库, 预约状态需人工修复
            error!(donation_id, batch_id = %batch.batch_id, error = %e, "献血完成状态落库失败");
            return Err(e.into());
        }

        info!(
            donation_id,
            batch_id = %batch.batch_id,
            units = record.units,
            expires_at = %expires_at,
            "献血完成, 批次已入库"
        );
        Ok(record)
    }

    pub async fn get(&self, donation_id: &str) -> EngineResult<Option<DonationRecord>> {
        Ok(self.donation_repo.find_donation(donation_id).await?)
    }

    pub async fn list_for_donor(&self, donor_id: &str) -> EngineResult<Vec<DonationRecord>> {
        Ok(self.donation_repo.list_by_donor(donor_id).await?)
    }

    pub async fn list_for_bank(&self, bank_id: &str) -> EngineResult<Vec<DonationRecord>> {
        Ok(self.donation_repo.list_by_bank(bank_id).await?)
    }

    /// 献血者概览: 完成次数 / 挽救生命数 / 下次预约 / 下次可献血时间
    pub async fn donor_summary(&self, donor_id: &str, now: DateTime<Utc>) -> EngineResult<DonorSummary> {
        let history = self.donation_repo.list_by_donor(donor_id).await?;
        Ok(DonorSummary::from_records(
            donor_id,
            &history,
            self.config.min_interval_days,
            now,
        ))
    }

    async fn load(&self, donation_id: &str) -> EngineResult<DonationRecord> {
        self.donation_repo
            .find_donation(donation_id)
            .await?
            .ok_or_else(|| EngineError::DonationNotFound(donation_id.to_string()))
    }

    fn check_transition(record: &DonationRecord, next: DonationStatus) -> EngineResult<()> {
        if record.can_transition_to(next) {
            Ok(())
        } else {
            Err(EngineError::InvalidStateTransition {
                from: record.status.to_string(),
                to: next.to_string(),
            })
        }
    }

    async fn transition(&self, donation_id: &str, next: DonationStatus) -> EngineResult<DonationRecord> {
        let mut record = self.load(donation_id).await?;
        Self::check_transition(&record, next)?;
        record.status = next;
        self.donation_repo.upsert_donation(&record).await?;
        info!(donation_id, status = %next, "献血预约状态已更新");
        Ok(record)
    }
}
