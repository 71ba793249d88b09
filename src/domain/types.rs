// ==========================================
// 血液供应匹配引擎 - 领域类型定义
// ==========================================
// 职责: 血型、紧急等级、状态机标签等基础枚举
// 红线: 血型只允许 8 种标准 ABO/Rh 组合
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ==========================================
// 血型 (Blood Type)
// ==========================================
// 声明顺序即"相容广度"顺序: 越靠后的血型可供给的受血者越多,
// O- 为万能供血者, 排在最后以保护其库存
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BloodType {
    #[serde(rename = "AB+")]
    AbPos,
    #[serde(rename = "AB-")]
    AbNeg,
    #[serde(rename = "A+")]
    APos,
    #[serde(rename = "A-")]
    ANeg,
    #[serde(rename = "B+")]
    BPos,
    #[serde(rename = "B-")]
    BNeg,
    #[serde(rename = "O+")]
    OPos,
    #[serde(rename = "O-")]
    ONeg,
}

/// 血型解析失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无效的血型: {0}")]
pub struct InvalidBloodType(pub String);

impl BloodType {
    /// 全部血型（相容广度顺序）
    pub const ALL: [BloodType; 8] = [
        BloodType::AbPos,
        BloodType::AbNeg,
        BloodType::APos,
        BloodType::ANeg,
        BloodType::BPos,
        BloodType::BNeg,
        BloodType::OPos,
        BloodType::ONeg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloodType::AbPos => "AB+",
            BloodType::AbNeg => "AB-",
            BloodType::APos => "A+",
            BloodType::ANeg => "A-",
            BloodType::BPos => "B+",
            BloodType::BNeg => "B-",
            BloodType::OPos => "O+",
            BloodType::ONeg => "O-",
        }
    }

    /// 是否携带 A 抗原
    pub fn has_a_antigen(&self) -> bool {
        matches!(
            self,
            BloodType::APos | BloodType::ANeg | BloodType::AbPos | BloodType::AbNeg
        )
    }

    /// 是否携带 B 抗原
    pub fn has_b_antigen(&self) -> bool {
        matches!(
            self,
            BloodType::BPos | BloodType::BNeg | BloodType::AbPos | BloodType::AbNeg
        )
    }

    /// Rh 阳性
    pub fn is_rh_positive(&self) -> bool {
        matches!(
            self,
            BloodType::APos | BloodType::BPos | BloodType::AbPos | BloodType::OPos
        )
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BloodType {
    type Err = InvalidBloodType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        BloodType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| InvalidBloodType(s.to_string()))
    }
}

// ==========================================
// 紧急等级 (Urgency)
// ==========================================
// 顺序: Low < Medium < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }

    /// 从字符串解析（未知值返回 None）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Urgency::Low),
            "medium" => Some(Urgency::Medium),
            "high" => Some(Urgency::High),
            "critical" => Some(Urgency::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 用血请求状态 (Request Status)
// ==========================================
// Active 为初始态, 其余均为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Active,
    Fulfilled,
    Expired,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Active => "active",
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Expired => "expired",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RequestStatus::Active),
            "fulfilled" => Some(RequestStatus::Fulfilled),
            "expired" => Some(RequestStatus::Expired),
            "cancelled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Active)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 献血预约状态 (Donation Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Confirmed => "confirmed",
            DonationStatus::Completed => "completed",
            DonationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DonationStatus::Pending),
            "confirmed" => Some(DonationStatus::Confirmed),
            "completed" => Some(DonationStatus::Completed),
            "cancelled" => Some(DonationStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 预留状态 (Reservation State)
// ==========================================
// 显式状态标签: pending -> committed | released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Pending,
    Committed,
    Released,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Pending => write!(f, "pending"),
            ReservationState::Committed => write!(f, "committed"),
            ReservationState::Released => write!(f, "released"),
        }
    }
}

// ==========================================
// 库存水位 (Stock Level)
// ==========================================
// 顺序: Critical < Low < Good < Excellent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Critical,
    Low,
    Good,
    Excellent,
}

impl fmt::Display for StockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockLevel::Critical => write!(f, "critical"),
            StockLevel::Low => write!(f, "low"),
            StockLevel::Good => write!(f, "good"),
            StockLevel::Excellent => write!(f, "excellent"),
        }
    }
}
