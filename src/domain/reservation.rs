// ==========================================
// 血液供应匹配引擎 - 库存预留
// ==========================================
// 预留 = 对库存的临时、限时占用
// 状态: pending -> committed | released
// ==========================================

use crate::domain::types::{BloodType, ReservationState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个批次上的占用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchHold {
    pub batch_id: String,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub bank_id: String,
    pub blood_type: BloodType,
    pub holds: Vec<BatchHold>,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    /// 超过此时刻仍未提交则自动释放
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn quantity(&self) -> u32 {
        self.holds.iter().map(|h| h.quantity).sum()
    }

    pub fn is_pending(&self) -> bool {
        self.state == ReservationState::Pending
    }

    /// 过期时刻本身视为已过期
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at <= now
    }
}
