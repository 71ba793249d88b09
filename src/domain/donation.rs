// ==========================================
// 血液供应匹配引擎 - 献血预约记录
// ==========================================
// 状态机: pending -> confirmed -> completed
//         pending | confirmed -> cancelled
// ==========================================

use crate::domain::types::{BloodType, DonationStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: String,
    pub donor_id: String,
    pub bank_id: String,
    pub blood_type: BloodType,
    pub units: u32,
    pub scheduled_date: DateTime<Utc>,
    pub status: DonationStatus,
    pub notes: Option<String>,
    /// 完成后入库的批次
    pub batch_id: Option<String>,
    /// 实际完成时间
    pub completed_at: Option<DateTime<Utc>>,
}

impl DonationRecord {
    /// 状态转换是否合法
    pub fn can_transition_to(&self, next: DonationStatus) -> bool {
        use DonationStatus::*;
        matches!(
            (self.status, next),
            (Pending, Confirmed)
                | (Pending, Completed)
                | (Confirmed, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    /// 实际献血时间; 未记录完成时间时以预约时间计
    pub fn donated_at(&self) -> Option<DateTime<Utc>> {
        (self.status == DonationStatus::Completed)
            .then(|| self.completed_at.unwrap_or(self.scheduled_date))
    }
}

/// 每次献血估计挽救的生命数
pub const LIVES_PER_DONATION: u32 = 3;

/// 献血者概览（献血者仪表盘）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorSummary {
    pub donor_id: String,
    pub completed_donations: u32,
    pub units_donated: u32,
    pub lives_saved: u32,
    pub last_donation: Option<DateTime<Utc>>,
    /// 最近一次尚未到期的已确认预约
    pub next_confirmed: Option<DonationRecord>,
    /// None 表示从未献血, 随时可以预约
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub eligible_now: bool,
}

impl DonorSummary {
    pub fn from_records(
        donor_id: &str,
        records: &[DonationRecord],
        min_interval_days: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let completed: Vec<&DonationRecord> = records
            .iter()
            .filter(|r| r.status == DonationStatus::Completed)
            .collect();
        let completed_donations = completed.len() as u32;
        let last_donation = completed.iter().filter_map(|r| r.donated_at()).max();
        let next_eligible_at = last_donation.map(|t| t + Duration::days(min_interval_days));

        let next_confirmed = records
            .iter()
            .filter(|r| r.status == DonationStatus::Confirmed && r.scheduled_date >= now)
            .min_by(|a, b| {
                a.scheduled_date
                    .cmp(&b.scheduled_date)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned();

        Self {
            donor_id: donor_id.to_string(),
            completed_donations,
            units_donated: completed.iter().map(|r| r.units).sum(),
            lives_saved: completed_donations * LIVES_PER_DONATION,
            last_donation,
            next_confirmed,
            next_eligible_at,
            eligible_now: next_eligible_at.map_or(true, |t| now >= t),
        }
    }
}
