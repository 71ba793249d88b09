use crate::domain::plan::AllocationPlan;
use crate::domain::types::Urgency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// CycleReport - 单个调度周期的结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// 本周期过期的请求
    pub expired: Vec<String>,
    pub fulfilled: Vec<String>,
    /// 部分满足, 仍为 active
    pub partial: Vec<String>,
    /// 库存不足, 已重新入队
    pub deferred: Vec<String>,
    /// 本周期新挂起的请求
    pub stalled: Vec<String>,
    /// 规划或存储失败（按请求）
    pub failures: Vec<RequestFailure>,
    /// 已提交的方案
    pub plans: Vec<AllocationPlan>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            expired: Vec::new(),
            fulfilled: Vec::new(),
            partial: Vec::new(),
            deferred: Vec::new(),
            stalled: Vec::new(),
            failures: Vec::new(),
            plans: Vec::new(),
        }
    }

    pub fn dispatched(&self) -> usize {
        self.fulfilled.len() + self.partial.len() + self.deferred.len()
            + self
                .failures
                .iter()
                .filter(|f| f.stage == FailureStage::Planning)
                .count()
    }

    pub fn is_idle(&self) -> bool {
        self.expired.is_empty() && self.dispatched() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Planning,
    Persistence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFailure {
    pub request_id: String,
    pub stage: FailureStage,
    pub error: String,
}

/// 队列统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// 调度器跟踪的 active 请求
    pub active: usize,
    pub queued: usize,
    pub stalled: usize,
    pub queued_by_urgency: BTreeMap<Urgency, usize>,
}
