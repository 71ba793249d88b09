// ==========================================
// 血液供应匹配引擎 - 血库与血液批次
// ==========================================
// 职责: 血库主数据、地理位置、营业时间、血液批次
// 红线: 库存只允许通过台账操作变更, 不直接写字段
// ==========================================

use crate::domain::types::BloodType;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// 地球平均半径（千米）
const EARTH_RADIUS_KM: f64 = 6371.0;

// ==========================================
// GeoPoint - 地理坐标
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// 大圆距离（haversine，单位千米）
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }
}

// ==========================================
// OperatingHours - 营业时间
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OperatingHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    /// 全天营业
    pub fn all_day() -> Self {
        Self {
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
        }
    }

    /// 判断给定时刻是否营业
    ///
    /// open == close 视为 24 小时营业；close < open 视为跨午夜
    pub fn is_open_at(&self, time: NaiveTime) -> bool {
        if self.open == self.close {
            return true;
        }
        if self.open < self.close {
            time >= self.open && time < self.close
        } else {
            time >= self.open || time < self.close
        }
    }
}

// ==========================================
// BloodBank - 血库
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodBank {
    pub id: String,
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub location: GeoPoint,
    pub operating_hours: OperatingHours,
}

impl BloodBank {
    /// 最小血库记录（全天营业, 无联系方式）
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: String::new(),
            phone: None,
            email: None,
            location,
            operating_hours: OperatingHours::all_day(),
        }
    }

    pub fn distance_from(&self, point: &GeoPoint) -> f64 {
        self.location.distance_km(point)
    }
}

// ==========================================
// BloodUnit - 血液批次
// ==========================================
// 同一次采集、同一血型、同一过期时间的一批血液
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodUnit {
    pub batch_id: String,
    pub bank_id: String,
    pub blood_type: BloodType,
    pub quantity: u32,
    pub collected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BloodUnit {
    /// 已过期（过期时刻本身视为已过期）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// 可从台账中移除: 数量为 0 或已过期
    pub fn is_depleted(&self, now: DateTime<Utc>) -> bool {
        self.quantity == 0 || self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_distance_between_midtown_and_downtown() {
        // 原型地图中的两个血库
        let city_general = GeoPoint::new(40.7580, -73.9855);
        let community = GeoPoint::new(40.7282, -73.9942);
        let d = city_general.distance_km(&community);
        assert!(d > 3.0 && d < 3.8, "distance={}", d);
        assert_eq!(city_general.distance_km(&city_general), 0.0);
    }

    #[test]
    fn test_operating_hours() {
        let hours = OperatingHours::new(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        );
        assert!(hours.is_open_at(NaiveTime::from_hms_opt(8, 0, 0).unwrap()));
        assert!(!hours.is_open_at(NaiveTime::from_hms_opt(18, 0, 0).unwrap()));
        assert!(!hours.is_open_at(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));

        let night = OperatingHours::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        );
        assert!(night.is_open_at(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(!night.is_open_at(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(OperatingHours::all_day().is_open_at(NaiveTime::from_hms_opt(4, 0, 0).unwrap()));
    }

    #[test]
    fn test_unit_depletion() {
        let now = Utc::now();
        let mut unit = BloodUnit {
            batch_id: "b1".to_string(),
            bank_id: "bb1".to_string(),
            blood_type: BloodType::OPos,
            quantity: 3,
            collected_at: now - Duration::days(1),
            expires_at: now + Duration::days(10),
        };
        assert!(!unit.is_depleted(now));
        assert!(unit.is_depleted(now + Duration::days(10)));
        unit.quantity = 0;
        assert!(unit.is_depleted(now));
    }
}
