// ==========================================
// 血液供应匹配引擎 - 引擎参数
// ==========================================
// 职责: 各引擎参数结构与默认值
// 来源: ConfigManager 从 config_kv 表读取覆写
// ==========================================

use crate::domain::types::StockLevel;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// 库存台账参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// 预留有效期（秒）, 超时未提交自动释放
    pub reservation_ttl_secs: i64,
    /// 单个 (血库, 血型) 锁的最长等待（毫秒）
    pub lock_timeout_ms: u64,
    /// 后台清理过期预留的周期（秒）
    pub sweep_interval_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 300,
            lock_timeout_ms: 2_000,
            sweep_interval_secs: 30,
        }
    }
}

impl LedgerConfig {
    pub fn reservation_ttl(&self) -> Duration {
        Duration::seconds(self.reservation_ttl_secs)
    }

    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }
}

/// 分配规划参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlannerConfig {
    /// 允许部分满足（提交部分方案并报告缺口）
    pub allow_partial: bool,
    /// 搜索半径（千米）, None 表示不限
    pub max_distance_km: Option<f64>,
}

/// 请求调度参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 规划失败达到此次数后挂起为 stalled
    pub max_attempts: u32,
    /// 同一周期内并行规划的请求数
    pub dispatch_concurrency: usize,
    /// 后台调度周期（秒）
    pub cycle_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            dispatch_concurrency: 1,
            cycle_interval_secs: 60,
        }
    }
}

/// 献血入库参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationConfig {
    /// 全血保存期（天）
    pub shelf_life_days: i64,
    /// 两次全血献血的最短间隔（天）
    pub min_interval_days: i64,
}

impl Default for DonationConfig {
    fn default() -> Self {
        Self {
            shelf_life_days: 42,
            min_interval_days: 56,
        }
    }
}

/// 库存水位阈值（可用单位数）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockThresholds {
    pub critical_below: u32,
    pub low_below: u32,
    pub good_below: u32,
}

impl Default for StockThresholds {
    fn default() -> Self {
        Self {
            critical_below: 10,
            low_below: 20,
            good_below: 50,
        }
    }
}

impl StockThresholds {
    pub fn classify(&self, units: u32) -> StockLevel {
        if units < self.critical_below {
            StockLevel::Critical
        } else if units < self.low_below {
            StockLevel::Low
        } else if units < self.good_below {
            StockLevel::Good
        } else {
            StockLevel::Excellent
        }
    }
}

/// 引擎参数全集
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub ledger: LedgerConfig,
    pub planner: PlannerConfig,
    pub scheduler: SchedulerConfig,
    pub donation: DonationConfig,
    pub stock: StockThresholds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_level_thresholds() {
        let t = StockThresholds::default();
        assert_eq!(t.classify(0), StockLevel::Critical);
        assert_eq!(t.classify(9), StockLevel::Critical);
        assert_eq!(t.classify(10), StockLevel::Low);
        assert_eq!(t.classify(19), StockLevel::Low);
        assert_eq!(t.classify(20), StockLevel::Good);
        assert_eq!(t.classify(49), StockLevel::Good);
        assert_eq!(t.classify(50), StockLevel::Excellent);
    }
}
