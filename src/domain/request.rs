// ==========================================
// 血液供应匹配引擎 - 用血请求
// ==========================================
// 状态机: active -> fulfilled | expired | cancelled
// 红线: fulfilled 只能由分配规划成功触发
// ==========================================

use crate::domain::blood_bank::GeoPoint;
use crate::domain::types::{BloodType, RequestStatus, Urgency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodRequest {
    pub id: String,
    pub recipient_id: String,
    pub blood_type: BloodType,
    pub units_needed: u32,
    /// 已通过部分分配满足的数量
    pub units_fulfilled: u32,
    pub urgency: Urgency,
    pub hospital_name: Option<String>,
    pub patient_name: Option<String>,
    pub doctor_name: Option<String>,
    /// 医院联系电话
    pub contact_number: Option<String>,
    pub medical_reason: Option<String>,
    pub location: GeoPoint,
    pub date_requested: DateTime<Utc>,
    pub required_by: DateTime<Utc>,
    pub status: RequestStatus,
    /// 规划失败次数
    pub attempts: u32,
}

impl BloodRequest {
    /// 创建新的 active 请求
    pub fn new(
        recipient_id: impl Into<String>,
        blood_type: BloodType,
        units_needed: u32,
        urgency: Urgency,
        location: GeoPoint,
        date_requested: DateTime<Utc>,
        required_by: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recipient_id: recipient_id.into(),
            blood_type,
            units_needed,
            units_fulfilled: 0,
            urgency,
            hospital_name: None,
            patient_name: None,
            doctor_name: None,
            contact_number: None,
            medical_reason: None,
            location,
            date_requested,
            required_by,
            status: RequestStatus::Active,
            attempts: 0,
        }
    }

    pub fn with_hospital(mut self, hospital_name: impl Into<String>) -> Self {
        self.hospital_name = Some(hospital_name.into());
        self
    }

    /// 仍需分配的数量
    pub fn outstanding_units(&self) -> u32 {
        self.units_needed.saturating_sub(self.units_fulfilled)
    }

    pub fn is_active(&self) -> bool {
        self.status == RequestStatus::Active
    }

    /// active 且已超过 required_by
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now > self.required_by
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_outstanding_and_overdue() {
        let now = Utc::now();
        let mut req = BloodRequest::new(
            "r1",
            BloodType::APos,
            3,
            Urgency::High,
            GeoPoint::new(40.7128, -74.0060),
            now,
            now + Duration::days(5),
        );
        assert_eq!(req.outstanding_units(), 3);
        req.units_fulfilled = 2;
        assert_eq!(req.outstanding_units(), 1);

        assert!(!req.is_overdue(now + Duration::days(5)));
        assert!(req.is_overdue(now + Duration::days(5) + Duration::seconds(1)));

        req.status = RequestStatus::Cancelled;
        assert!(!req.is_overdue(now + Duration::days(30)));
    }
}
