// ==========================================
// 血液供应匹配引擎 - 引擎层事件发布
// ==========================================
// 职责: 定义匹配事件与发布 trait, 展示层/通知服务实现适配器
// 说明: 发布失败只记录日志, 不影响引擎主流程
// ==========================================

use crate::domain::types::BloodType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// 匹配事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchingEventType {
    /// 请求完全满足
    RequestFulfilled,
    /// 请求部分满足（仍为 active）
    RequestPartiallyFulfilled,
    /// 请求超过 required_by 自动过期
    RequestExpired,
    /// 重试次数耗尽, 挂起等待人工处理
    RequestStalled,
    /// 请求被取消
    RequestCancelled,
    /// 某 (血库, 血型) 库存降到危急水位
    StockCritical,
    /// 新批次入库
    BatchReceived,
}

impl MatchingEventType {
    pub fn as_str(&self) -> &str {
        match self {
            MatchingEventType::RequestFulfilled => "RequestFulfilled",
            MatchingEventType::RequestPartiallyFulfilled => "RequestPartiallyFulfilled",
            MatchingEventType::RequestExpired => "RequestExpired",
            MatchingEventType::RequestStalled => "RequestStalled",
            MatchingEventType::RequestCancelled => "RequestCancelled",
            MatchingEventType::StockCritical => "StockCritical",
            MatchingEventType::BatchReceived => "BatchReceived",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingEvent {
    pub event_type: MatchingEventType,
    pub request_id: Option<String>,
    pub bank_id: Option<String>,
    pub blood_type: Option<BloodType>,
    pub units: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

impl MatchingEvent {
    /// 与某个请求相关的事件
    pub fn for_request(
        event_type: MatchingEventType,
        request_id: &str,
        blood_type: BloodType,
        units: Option<u32>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            request_id: Some(request_id.to_string()),
            bank_id: None,
            blood_type: Some(blood_type),
            units,
            occurred_at,
        }
    }

    /// 与某个血库库存相关的事件
    pub fn for_stock(
        event_type: MatchingEventType,
        bank_id: &str,
        blood_type: BloodType,
        units: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            request_id: None,
            bank_id: Some(bank_id.to_string()),
            blood_type: Some(blood_type),
            units: Some(units),
            occurred_at,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================
pub trait MatchingEventPublisher: Send + Sync {
    fn publish(&self, event: MatchingEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl MatchingEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: MatchingEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(event_type = event.event_type.as_str(), "NoOpEventPublisher: 跳过事件发布");
        Ok(())
    }
}

/// 内存记录型发布者（测试 / 仪表盘最近事件）
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<MatchingEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MatchingEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, event_type: MatchingEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl MatchingEventPublisher for RecordingEventPublisher {
    fn publish(&self, event: MatchingEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.events
            .lock()
            .map_err(|e| format!("锁获取失败: {}", e))?
            .push(event);
        Ok(())
    }
}

/// 可选的事件发布者包装
///
/// 发布失败只告警
#[derive(Clone, Default)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn MatchingEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn MatchingEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn publish(&self, event: MatchingEvent) {
        if let Some(publisher) = &self.inner {
            let event_type = event.event_type;
            if let Err(e) = publisher.publish(event) {
                tracing::warn!(event_type = event_type.as_str(), error = %e, "事件发布失败");
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}
