// ==========================================
// 请求调度器 - 优先队列
// ==========================================

use crate::domain::request::BloodRequest;
use crate::domain::types::Urgency;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// 队列键
///
/// `Ord` 的"更大"即"更先分派": 紧急度高者大, 同紧急度时请求时间早者大,
/// 再相同时请求ID小者大
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub urgency: Urgency,
    pub date_requested: DateTime<Utc>,
    pub request_id: String,
}

impl QueueEntry {
    pub fn of(request: &BloodRequest) -> Self {
        Self {
            urgency: request.urgency,
            date_requested: request.date_requested,
            request_id: request.id.clone(),
        }
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.urgency
            .cmp(&other.urgency)
            .then_with(|| other.date_requested.cmp(&self.date_requested))
            .then_with(|| other.request_id.cmp(&self.request_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 去重的优先队列
///
/// remove 为惰性删除: 只从成员集合中移除, 出队时跳过
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueueEntry>,
    members: HashSet<String>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队; 已在队列中则返回 false
    pub fn push(&mut self, entry: QueueEntry) -> bool {
        if !self.members.insert(entry.request_id.clone()) {
            return false;
        }
        self.heap.push(entry);
        true
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        while let Some(entry) = self.heap.pop() {
            if self.members.remove(&entry.request_id) {
                return Some(entry);
            }
        }
        None
    }

    pub fn remove(&mut self, request_id: &str) -> bool {
        self.members.remove(request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.members.contains(request_id)
    }

    /// 按优先顺序取出全部
    pub fn drain_ordered(&mut self) -> Vec<QueueEntry> {
        let mut out = Vec::with_capacity(self.members.len());
        while let Some(entry) = self.pop() {
            out.push(entry);
        }
        self.heap.clear();
        out
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
