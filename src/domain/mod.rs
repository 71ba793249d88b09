// ==========================================
// 血液供应匹配引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod blood_bank;
pub mod donation;
pub mod plan;
pub mod request;
pub mod reservation;
pub mod types;

// 重导出核心类型
pub use blood_bank::{BloodBank, BloodUnit, GeoPoint, OperatingHours};
pub use donation::{DonationRecord, DonorSummary};
pub use plan::{AllocationPlan, AllocationSegment};
pub use request::BloodRequest;
pub use reservation::{BatchHold, Reservation};
pub use types::{
    BloodType, DonationStatus, InvalidBloodType, RequestStatus, ReservationState, StockLevel,
    Urgency,
};
