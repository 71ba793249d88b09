// ==========================================
// 血液供应匹配引擎 - 分配方案
// ==========================================
// 临时值对象: 每个规划周期重新生成, 不持久化
// ==========================================

use crate::domain::types::BloodType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 分配方案中的一段: 某血库某批次的若干单位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSegment {
    pub bank_id: String,
    pub blood_type: BloodType,
    pub quantity: u32,
    pub batch_ref: String,
    pub expires_at: DateTime<Utc>,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub request_id: String,
    pub segments: Vec<AllocationSegment>,
    /// 未满足的数量（只有允许部分满足时才可能 > 0）
    pub shortfall: u32,
}

impl AllocationPlan {
    pub fn total_quantity(&self) -> u32 {
        self.segments.iter().map(|s| s.quantity).sum()
    }

    pub fn is_partial(&self) -> bool {
        self.shortfall > 0
    }

    /// 使用了与请求不同的血型
    pub fn uses_cross_type(&self, requested: BloodType) -> bool {
        self.segments.iter().any(|s| s.blood_type != requested)
    }
}
