// ==========================================
// 血液供应匹配引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope, 当前仅 global)
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 库存台账
    pub const RESERVATION_TTL_SECS: &str = "ledger.reservation_ttl_secs";
    pub const LOCK_TIMEOUT_MS: &str = "ledger.lock_timeout_ms";
    pub const SWEEP_INTERVAL_SECS: &str = "ledger.sweep_interval_secs";

    // 分配规划
    pub const ALLOW_PARTIAL: &str = "planner.allow_partial";
    pub const MAX_DISTANCE_KM: &str = "planner.max_distance_km";

    // 请求调度
    pub const MAX_ATTEMPTS: &str = "scheduler.max_attempts";
    pub const DISPATCH_CONCURRENCY: &str = "scheduler.dispatch_concurrency";
    pub const CYCLE_INTERVAL_SECS: &str = "scheduler.cycle_interval_secs";

    // 献血入库
    pub const SHELF_LIFE_DAYS: &str = "donation.shelf_life_days";
    pub const MIN_DONATION_INTERVAL_DAYS: &str = "donation.min_interval_days";

    // 库存水位
    pub const STOCK_CRITICAL_BELOW: &str = "stock.critical_below";
    pub const STOCK_LOW_BELOW: &str = "stock.low_below";
    pub const STOCK_GOOD_BELOW: &str = "stock.good_below";

    /// 全部可配置键
    pub const ALL: [&str; 13] = [
        RESERVATION_TTL_SECS,
        LOCK_TIMEOUT_MS,
        SWEEP_INTERVAL_SECS,
        ALLOW_PARTIAL,
        MAX_DISTANCE_KM,
        MAX_ATTEMPTS,
        DISPATCH_CONCURRENCY,
        CYCLE_INTERVAL_SECS,
        SHELF_LIFE_DAYS,
        MIN_DONATION_INTERVAL_DAYS,
        STOCK_CRITICAL_BELOW,
        STOCK_LOW_BELOW,
        STOCK_GOOD_BELOW,
    ];
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 删除 global 配置（恢复默认值）
    pub fn remove_global_config_value(&self, key: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
        )?;
        Ok(rows > 0)
    }

    /// 读取并解析配置值, 缺失时使用默认值
    fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> RepositoryResult<T> {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|_| RepositoryError::FieldValueError {
                field: key.to_string(),
                message: format!("无法解析配置值: {}", raw),
            }),
        }
    }

    /// 组装引擎参数（未配置的键使用默认值）
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        use config_keys::*;

        let d = EngineConfig::default();
        let mut cfg = EngineConfig::default();

        cfg.ledger.reservation_ttl_secs =
            self.get_parsed_or(RESERVATION_TTL_SECS, d.ledger.reservation_ttl_secs)?;
        cfg.ledger.lock_timeout_ms = self.get_parsed_or(LOCK_TIMEOUT_MS, d.ledger.lock_timeout_ms)?;
        cfg.ledger.sweep_interval_secs =
            self.get_parsed_or(SWEEP_INTERVAL_SECS, d.ledger.sweep_interval_secs)?;

        cfg.planner.allow_partial = self.get_parsed_or(ALLOW_PARTIAL, d.planner.allow_partial)?;
        // 空串 / none 表示不限半径
        cfg.planner.max_distance_km = match self.get_global_config_value(MAX_DISTANCE_KM)? {
            None => d.planner.max_distance_km,
            Some(raw) if raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case("none") => None,
            Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
                RepositoryError::FieldValueError {
                    field: MAX_DISTANCE_KM.to_string(),
                    message: format!("无法解析配置值: {}", raw),
                }
            })?),
        };

        cfg.scheduler.max_attempts = self.get_parsed_or(MAX_ATTEMPTS, d.scheduler.max_attempts)?;
        cfg.scheduler.dispatch_concurrency =
            self.get_parsed_or(DISPATCH_CONCURRENCY, d.scheduler.dispatch_concurrency)?;
        cfg.scheduler.cycle_interval_secs =
            self.get_parsed_or(CYCLE_INTERVAL_SECS, d.scheduler.cycle_interval_secs)?;

        cfg.donation.shelf_life_days =
            self.get_parsed_or(SHELF_LIFE_DAYS, d.donation.shelf_life_days)?;
        cfg.donation.min_interval_days =
            self.get_parsed_or(MIN_DONATION_INTERVAL_DAYS, d.donation.min_interval_days)?;

        cfg.stock.critical_below = self.get_parsed_or(STOCK_CRITICAL_BELOW, d.stock.critical_below)?;
        cfg.stock.low_below = self.get_parsed_or(STOCK_LOW_BELOW, d.stock.low_below)?;
        cfg.stock.good_below = self.get_parsed_or(STOCK_GOOD_BELOW, d.stock.good_below)?;

        if cfg.donation.min_interval_days < 0 {
            return Err(RepositoryError::FieldValueError {
                field: MIN_DONATION_INTERVAL_DAYS.to_string(),
                message: "献血间隔不能为负数".to_string(),
            });
        }

        if cfg.scheduler.dispatch_concurrency == 0 {
            return Err(RepositoryError::FieldValueError {
                field: DISPATCH_CONCURRENCY.to_string(),
                message: "并发度必须 >= 1".to_string(),
            });
        }

        Ok(cfg)
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        serde_json::to_string(&config_map)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn manager() -> ConfigManager {
        let conn = open_in_memory().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_defaults_when_table_empty() {
        let cfg = manager().load_engine_config().unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_overrides_are_applied() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::ALLOW_PARTIAL, "true").unwrap();
        mgr.set_global_config_value(config_keys::MAX_DISTANCE_KM, "10").unwrap();
        mgr.set_global_config_value(config_keys::MAX_ATTEMPTS, "3").unwrap();
        mgr.set_global_config_value(config_keys::MAX_ATTEMPTS, "4").unwrap();

        let cfg = mgr.load_engine_config().unwrap();
        assert!(cfg.planner.allow_partial);
        assert_eq!(cfg.planner.max_distance_km, Some(10.0));
        assert_eq!(cfg.scheduler.max_attempts, 4);

        mgr.set_global_config_value(config_keys::MAX_DISTANCE_KM, "none").unwrap();
        assert_eq!(mgr.load_engine_config().unwrap().planner.max_distance_km, None);
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::LOCK_TIMEOUT_MS, "soon").unwrap();
        let err = mgr.load_engine_config().unwrap_err();
        assert!(matches!(err, RepositoryError::FieldValueError { .. }));

        let mgr = manager();
        mgr.set_global_config_value(config_keys::DISPATCH_CONCURRENCY, "0").unwrap();
        assert!(mgr.load_engine_config().is_err());

        let mgr = manager();
        mgr.set_global_config_value(config_keys::MIN_DONATION_INTERVAL_DAYS, "-1").unwrap();
        assert!(mgr.load_engine_config().is_err());
        mgr.set_global_config_value(config_keys::MIN_DONATION_INTERVAL_DAYS, "90").unwrap();
        assert_eq!(mgr.load_engine_config().unwrap().donation.min_interval_days, 90);
    }

    #[test]
    fn test_snapshot_contains_overrides() {
        let mgr = manager();
        mgr.set_global_config_value(config_keys::SHELF_LIFE_DAYS, "35").unwrap();
        let snapshot = mgr.get_config_snapshot().unwrap();
        let map: BTreeMap<String, String> = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(map.get(config_keys::SHELF_LIFE_DAYS).map(String::as_str), Some("35"));
    }
}
