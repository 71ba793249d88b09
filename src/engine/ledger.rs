// ==========================================
// 血液供应匹配引擎 - 库存台账
// ==========================================
// 职责: 按 (血库, 血型) 管理批次库存, 提供 预留 / 提交 / 释放
// 红线:
// - 同一 (血库, 血型) 的操作互斥, 锁等待有上限
// - 预留总是先消耗最早过期的批次
// - 预留超时未提交自动释放
// - 过期批次在每次访问时惰性清除
// 写穿: 提交 / 入库 / 清除同步写入 InventoryRepository
// ==========================================

mod core;
mod snapshot;

#[cfg(test)]
mod tests;

pub use self::core::{InventoryLedger, StockKey};
pub use snapshot::{InventoryItem, InventorySnapshot};
