// ==========================================
// 血液供应匹配引擎 - 用血请求 API
// ==========================================
// 职责: 用血请求的提交 / 取消 / 查询 / 试算, 调度队列运维
// 依赖: RequestScheduler（生命周期）, AllocationPlanner（试算）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator;
use crate::domain::plan::AllocationPlan;
use crate::domain::request::BloodRequest;
use crate::engine::planner::AllocationPlanner;
use crate::engine::scheduler::{QueueStats, RequestScheduler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// 提交用血请求的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequestInput {
    pub recipient_id: String,
    pub blood_type: String,
    pub units_needed: u32,
    pub urgency: String,
    pub hospital_name: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub medical_reason: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub required_by: DateTime<Utc>,
}

pub struct RequestApi {
    scheduler: Arc<RequestScheduler>,
    planner: Arc<AllocationPlanner>,
}

impl RequestApi {
    pub fn new(scheduler: Arc<RequestScheduler>, planner: Arc<AllocationPlanner>) -> Self {
        Self { scheduler, planner }
    }

    /// 提交用血请求
    ///
    /// # 参数
    /// - `input`: 原始表单输入
    /// - `now`: 提交时刻（作为 date_requested）
    ///
    /// # 返回
    /// - Ok(request): 已落库并进入调度队列
    /// - Err(InvalidInput): 血型 / 紧急等级 / 坐标 / 单位数 / 联系电话非法
    pub async fn submit(&self, input: SubmitRequestInput, now: DateTime<Utc>) -> ApiResult<BloodRequest> {
        let recipient_id = validator::require_non_empty("recipient_id", &input.recipient_id)?;
        let blood_type = validator::parse_blood_type(&input.blood_type)?;
        let urgency = validator::parse_urgency(&input.urgency)?;
        let units = validator::validate_units(input.units_needed)?;
        let location = validator::validate_coordinates(input.lat, input.lng)?;
        let contact_number = validator::validate_contact_number(input.contact_number)?;
        if input.required_by <= now {
            return Err(ApiError::InvalidInput(format!(
                "required_by 必须晚于当前时间: {}",
                input.required_by
            )));
        }

        let mut request = BloodRequest::new(
            recipient_id,
            blood_type,
            units,
            urgency,
            location,
            now,
            input.required_by,
        );
        if let Some(hospital) = validator::optional_text(input.hospital_name) {
            request = request.with_hospital(hospital);
        }
        request.patient_name = validator::optional_text(input.patient_name);
        request.doctor_name = validator::optional_text(input.doctor_name);
        request.contact_number = contact_number;
        request.medical_reason = validator::optional_text(input.medical_reason);

        let request = self.scheduler.submit(request).await?;
        info!(request_id = %request.id, urgency = %request.urgency, "用血请求已受理");
        Ok(request)
    }

    pub async fn cancel(&self, request_id: &str, now: DateTime<Utc>) -> ApiResult<BloodRequest> {
        Ok(self.scheduler.cancel(request_id, now).await?)
    }

    pub async fn get(&self, request_id: &str) -> ApiResult<BloodRequest> {
        self.scheduler
            .get(request_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("用血请求(id={})不存在", request_id)))
    }

    /// 试算当前可得的分配方案（不预留库存）
    pub async fn preview(&self, request_id: &str, now: DateTime<Utc>) -> ApiResult<AllocationPlan> {
        let request = self.get(request_id).await?;
        let banks = self.planner.ledger().banks();
        Ok(self.planner.preview(&request, &banks, now).await?)
    }

    pub fn stalled(&self) -> ApiResult<Vec<BloodRequest>> {
        Ok(self.scheduler.stalled_requests()?)
    }

    pub async fn requeue_stalled(&self) -> ApiResult<usize> {
        Ok(self.scheduler.requeue_stalled().await?)
    }

    pub fn queue_stats(&self) -> ApiResult<QueueStats> {
        Ok(self.scheduler.queue_stats()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::engine_config::EngineConfig;
    use crate::domain::blood_bank::{BloodBank, GeoPoint};
    use crate::domain::types::{BloodType, RequestStatus, Urgency};
    use crate::engine::events::OptionalEventPublisher;
    use crate::engine::matching::MatchingEngine;
    use crate::engine::repositories::MatchingRepositories;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0).unwrap()
    }

    async fn setup() -> (RequestApi, MatchingEngine) {
        let engine = MatchingEngine::new(
            MatchingRepositories::in_memory(),
            EngineConfig::default(),
            OptionalEventPublisher::none(),
        );
        engine
            .register_bank(BloodBank::new("bb1", "City General", GeoPoint::new(40.7580, -73.9855)))
            .await
            .unwrap();
        let api = RequestApi::new(engine.scheduler().clone(), engine.planner().clone());
        (api, engine)
    }

    fn input(blood_type: &str, units: u32) -> SubmitRequestInput {
        SubmitRequestInput {
            recipient_id: "recipient-1".to_string(),
            blood_type: blood_type.to_string(),
            units_needed: units,
            urgency: "high".to_string(),
            hospital_name: Some("City General Hospital".to_string()),
            patient_name: Some("John Doe".to_string()),
            doctor_name: Some(" Dr. Smith ".to_string()),
            contact_number: Some("1234567890".to_string()),
            medical_reason: Some("Surgery".to_string()),
            lat: 40.7128,
            lng: -74.0060,
            required_by: now() + Duration::days(5),
        }
    }

    #[tokio::test]
    async fn test_submit_and_query() {
        let (api, _engine) = setup().await;
        let request = api.submit(input("A+", 3), now()).await.unwrap();
        assert_eq!(request.blood_type, BloodType::APos);
        assert_eq!(request.urgency, Urgency::High);
        assert_eq!(request.hospital_name.as_deref(), Some("City General Hospital"));
        assert_eq!(request.patient_name.as_deref(), Some("John Doe"));
        assert_eq!(request.doctor_name.as_deref(), Some("Dr. Smith"));
        assert_eq!(request.contact_number.as_deref(), Some("1234567890"));
        assert_eq!(request.medical_reason.as_deref(), Some("Surgery"));

        let fetched = api.get(&request.id).await.unwrap();
        assert_eq!(fetched.status, RequestStatus::Active);
        assert_eq!(api.queue_stats().unwrap().queued, 1);

        let cancelled = api.cancel(&request.id, now()).await.unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert!(matches!(api.get("missing").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let (api, _engine) = setup().await;
        assert!(matches!(
            api.submit(input("Z+", 1), now()).await,
            Err(ApiError::InvalidInput(_))
        ));
        assert!(matches!(
            api.submit(input("O-", 0), now()).await,
            Err(ApiError::InvalidInput(_))
        ));
        let mut late = input("O-", 1);
        late.required_by = now() - Duration::hours(1);
        assert!(matches!(api.submit(late, now()).await, Err(ApiError::InvalidInput(_))));
        let mut bad_phone = input("O-", 1);
        bad_phone.contact_number = Some("ext. 12".to_string());
        assert!(matches!(api.submit(bad_phone, now()).await, Err(ApiError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_preview_reports_shortfall_without_reserving() {
        let (api, engine) = setup().await;
        engine
            .ledger()
            .add_batch("bb1", BloodType::ONeg, 2, now(), now() + Duration::days(10), now())
            .await
            .unwrap();
        let request = api.submit(input("A+", 3), now()).await.unwrap();

        let plan = api.preview(&request.id, now()).await.unwrap();
        assert_eq!(plan.total_quantity(), 2);
        assert_eq!(plan.shortfall, 1);
        assert_eq!(
            engine.ledger().available("bb1", BloodType::ONeg, now()).await.unwrap(),
            2
        );
    }
}
