// ==========================================
// 血液供应匹配引擎 - 请求调度器
// ==========================================
// 职责: 维护 active 请求的优先队列, 按周期分派给分配规划引擎
// 排序: 紧急度降序 -> 请求时间升序 -> 请求ID升序
// 每个周期:
// 1) 先将超过 required_by 的 active 请求置为 expired
// 2) 按优先顺序出队并分派（分派按顺序启动, 并发度可配）
// 3) 成功 -> fulfilled; 部分满足 -> 保持 active 并重新入队;
//    失败 -> 计数并重新入队, 达到上限后挂起为 stalled
// 红线: 单个请求失败只写入报告, 调度循环不中断
// ==========================================

mod core;
mod queue;
mod report;

#[cfg(test)]
mod tests;

pub use self::core::{RequestScheduler, SchedulerHandle};
pub use queue::{QueueEntry, RequestQueue};
pub use report::{CycleReport, FailureStage, QueueStats, RequestFailure};
