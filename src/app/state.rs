// ==========================================
// 血液供应匹配引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use anyhow::Context;
use std::sync::{Arc, Mutex};

use crate::api::{ConfigApi, DashboardApi, DonationApi, RequestApi};
use crate::config::config_manager::ConfigManager;
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::events::OptionalEventPublisher;
use crate::engine::matching::MatchingEngine;
use crate::engine::repositories::MatchingRepositories;
use crate::repository::{
    BloodBankRepositoryImpl, BloodRequestRepositoryImpl, DonationRepositoryImpl,
    InventoryRepositoryImpl,
};

/// 应用状态
///
/// 所有 API 共享同一个 MatchingEngine（同一份库存台账）
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    pub engine: Arc<MatchingEngine>,

    pub request_api: Arc<RequestApi>,

    pub dashboard_api: Arc<DashboardApi>,

    pub donation_api: Arc<DonationApi>,

    /// 配置管理（config_kv 读写, 重启后生效）
    pub config_api: Arc<ConfigApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并初始化 schema
    /// 2. 从 config_kv 加载引擎参数
    /// 3. 组装 SQLite 仓储与匹配引擎
    /// 4. 创建所有API实例
    ///
    /// 台账与调度队列为空, 需调用 `MatchingEngine::bootstrap` 从仓储恢复
    pub fn new(db_path: String) -> anyhow::Result<Self> {
        Self::with_publisher(db_path, OptionalEventPublisher::none())
    }

    pub fn with_publisher(db_path: String, publisher: OptionalEventPublisher) -> anyhow::Result<Self> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .with_context(|| format!("无法打开数据库: {}", db_path))?;
        init_schema(&conn).context("数据库 schema 初始化失败")?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置
        // ==========================================
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let config = config_manager
            .load_engine_config()
            .context("引擎配置加载失败")?;
        tracing::debug!(?config, "引擎配置已加载");

        // ==========================================
        // 仓储 + 引擎
        // ==========================================
        let repos = MatchingRepositories::new(
            Arc::new(BloodBankRepositoryImpl::from_connection(conn.clone())),
            Arc::new(InventoryRepositoryImpl::from_connection(conn.clone())),
            Arc::new(BloodRequestRepositoryImpl::from_connection(conn.clone())),
            Arc::new(DonationRepositoryImpl::from_connection(conn)),
        );
        let engine = Arc::new(MatchingEngine::new(repos, config, publisher));

        // ==========================================
        // API
        // ==========================================
        let request_api = Arc::new(RequestApi::new(
            engine.scheduler().clone(),
            engine.planner().clone(),
        ));
        let dashboard_api = Arc::new(DashboardApi::new(
            engine.ledger().clone(),
            engine.repositories().request_repo.clone(),
            engine.repositories().donation_repo.clone(),
        ));
        let donation_api = Arc::new(DonationApi::new(engine.donations().clone()));
        let config_api = Arc::new(ConfigApi::new(config_manager));

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path,
            engine,
            request_api,
            dashboard_api,
            donation_api,
            config_api,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先使用环境变量 `LIFEBANK_DB_PATH`, 否则使用用户数据目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("LIFEBANK_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./lifebank.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        let dir = data_dir.join("lifebank-dev");

        #[cfg(not(debug_assertions))]
        let dir = data_dir.join("lifebank");

        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("lifebank.db");
        }
    }

    path.to_string_lossy().to_string()
}
