// ==========================================
// 血液供应匹配引擎 - 献血预约 API
// ==========================================

use crate::api::error::ApiResult;
use crate::api::validator;
use crate::domain::donation::{DonationRecord, DonorSummary};
use crate::engine::donation::DonationService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 预约献血的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDonationInput {
    pub donor_id: String,
    pub bank_id: String,
    pub blood_type: String,
    pub units: u32,
    pub scheduled_date: DateTime<Utc>,
    pub notes: Option<String>,
}

pub struct DonationApi {
    service: Arc<DonationService>,
}

impl DonationApi {
    pub fn new(service: Arc<DonationService>) -> Self {
        Self { service }
    }

    pub async fn schedule(&self, input: ScheduleDonationInput) -> ApiResult<DonationRecord> {
        let donor_id = validator::require_non_empty("donor_id", &input.donor_id)?;
        let bank_id = validator::require_non_empty("bank_id", &input.bank_id)?;
        let blood_type = validator::parse_blood_type(&input.blood_type)?;
        let units = validator::validate_units(input.units)?;

        Ok(self
            .service
            .schedule(&donor_id, &bank_id, blood_type, units, input.scheduled_date, input.notes)
            .await?)
    }

    pub async fn confirm(&self, donation_id: &str) -> ApiResult<DonationRecord> {
        Ok(self.service.confirm(donation_id).await?)
    }

    pub async fn cancel(&self, donation_id: &str) -> ApiResult<DonationRecord> {
        Ok(self.service.cancel(donation_id).await?)
    }

    /// 完成献血, 血液入库
    pub async fn complete(&self, donation_id: &str, now: DateTime<Utc>) -> ApiResult<DonationRecord> {
        Ok(self.service.complete(donation_id, now).await?)
    }

    pub async fn donor_history(&self, donor_id: &str) -> ApiResult<Vec<DonationRecord>> {
        Ok(self.service.list_for_donor(donor_id).await?)
    }

    pub async fn bank_donations(&self, bank_id: &str) -> ApiResult<Vec<DonationRecord>> {
        Ok(self.service.list_for_bank(bank_id).await?)
    }

    /// 献血者仪表盘概览
    pub async fn donor_summary(&self, donor_id: &str, now: DateTime<Utc>) -> ApiResult<DonorSummary> {
        let donor_id = validator::require_non_empty("donor_id", donor_id)?;
        Ok(self.service.donor_summary(&donor_id, now).await?)
    }
}
