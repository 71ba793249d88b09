// ==========================================
// 血液供应匹配引擎 - 配置管理 API
// ==========================================
// 职责: 引擎参数查询、更新、快照
// 说明: 修改写入 config_kv, 下次启动时生效
// ==========================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::{config_keys, ConfigManager};
use crate::config::engine_config::EngineConfig;

/// 配置项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub key: String,
    /// None 表示未覆写, 使用默认值
    pub value: Option<String>,
}

pub struct ConfigApi {
    config_manager: Arc<ConfigManager>,
}

impl ConfigApi {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self { config_manager }
    }

    /// 查询所有可配置项（按键名顺序）
    pub fn list_configs(&self) -> ApiResult<Vec<ConfigItem>> {
        let mut keys = config_keys::ALL.to_vec();
        keys.sort_unstable();
        keys.into_iter()
            .map(|key| -> ApiResult<ConfigItem> {
                Ok(ConfigItem {
                    key: key.to_string(),
                    value: self.config_manager.get_global_config_value(key)?,
                })
            })
            .collect()
    }

    /// 当前生效的引擎参数（覆写 + 默认值）
    pub fn effective_config(&self) -> ApiResult<EngineConfig> {
        Ok(self.config_manager.load_engine_config()?)
    }

    /// 更新配置
    ///
    /// # 参数
    /// - key: 配置键（必须是已知键）
    /// - value: 配置值
    ///
    /// # 返回
    /// - Ok(EngineConfig): 更新后的引擎参数
    /// - Err(InvalidInput): 未知键, 或值无法解析（已恢复原值）
    pub fn update_config(&self, key: &str, value: &str) -> ApiResult<EngineConfig> {
        let key = Self::known_key(key)?;
        let previous = self.config_manager.get_global_config_value(key)?;

        self.config_manager.set_global_config_value(key, value.trim())?;
        match self.config_manager.load_engine_config() {
            Ok(cfg) => {
                info!(key, value, "配置已更新, 重启后生效");
                Ok(cfg)
            }
            Err(e) => {
                match previous {
                    Some(old) => self.config_manager.set_global_config_value(key, &old)?,
                    None => {
                        self.config_manager.remove_global_config_value(key)?;
                    }
                }
                Err(ApiError::InvalidInput(format!("配置值无效 ({}={}): {}", key, value, e)))
            }
        }
    }

    /// 删除覆写, 恢复默认值
    pub fn reset_config(&self, key: &str) -> ApiResult<bool> {
        let key = Self::known_key(key)?;
        Ok(self.config_manager.remove_global_config_value(key)?)
    }

    /// 获取配置快照（JSON）
    pub fn get_config_snapshot(&self) -> ApiResult<String> {
        Ok(self.config_manager.get_config_snapshot()?)
    }

    fn known_key(key: &str) -> ApiResult<&'static str> {
        let key = key.trim();
        config_keys::ALL
            .iter()
            .copied()
            .find(|k| *k == key)
            .ok_or_else(|| ApiError::InvalidInput(format!("未知配置键: {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use std::sync::Mutex;

    fn api() -> ConfigApi {
        let conn = open_in_memory().unwrap();
        ConfigApi::new(Arc::new(ConfigManager::from_connection(Arc::new(Mutex::new(conn)))))
    }

    #[test]
    fn test_update_and_reset() {
        let api = api();
        let cfg = api.update_config(config_keys::SHELF_LIFE_DAYS, " 35 ").unwrap();
        assert_eq!(cfg.donation.shelf_life_days, 35);

        let items = api.list_configs().unwrap();
        assert_eq!(items.len(), config_keys::ALL.len());
        let shelf = items.iter().find(|i| i.key == config_keys::SHELF_LIFE_DAYS).unwrap();
        assert_eq!(shelf.value.as_deref(), Some("35"));

        assert!(api.reset_config(config_keys::SHELF_LIFE_DAYS).unwrap());
        assert_eq!(api.effective_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_invalid_value_restores_previous() {
        let api = api();
        api.update_config(config_keys::MAX_ATTEMPTS, "3").unwrap();

        let err = api.update_config(config_keys::MAX_ATTEMPTS, "many").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(api.effective_config().unwrap().scheduler.max_attempts, 3);

        let err = api.update_config(config_keys::DISPATCH_CONCURRENCY, "0").unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert_eq!(api.effective_config().unwrap().scheduler.dispatch_concurrency, 1);

        assert!(matches!(
            api.update_config("planner.colour", "red"),
            Err(ApiError::InvalidInput(_))
        ));
    }
}
