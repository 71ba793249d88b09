// ==========================================
// 血液供应匹配引擎 - 引擎编排器
// ==========================================
// 用途: 按 EngineConfig 组装 台账 / 规划 / 调度 / 献血服务,
//       负责启动恢复与后台任务生命周期
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::domain::blood_bank::BloodBank;
use crate::engine::donation::DonationService;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::OptionalEventPublisher;
use crate::engine::ledger::InventoryLedger;
use crate::engine::planner::AllocationPlanner;
use crate::engine::repositories::MatchingRepositories;
use crate::engine::scheduler::{RequestScheduler, SchedulerHandle};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 启动恢复结果
#[derive(Debug, Clone, Default)]
pub struct BootstrapSummary {
    pub banks: usize,
    pub batches: usize,
    pub requests: usize,
}

// ==========================================
// MatchingEngine - 引擎编排器
// ==========================================
pub struct MatchingEngine {
    config: EngineConfig,
    repos: MatchingRepositories,
    ledger: Arc<InventoryLedger>,
    planner: Arc<AllocationPlanner>,
    scheduler: Arc<RequestScheduler>,
    donations: Arc<DonationService>,
}

impl MatchingEngine {
    pub fn new(
        repos: MatchingRepositories,
        config: EngineConfig,
        publisher: OptionalEventPublisher,
    ) -> Self {
        let ledger = Arc::new(
            InventoryLedger::new(
                repos.inventory_repo.clone(),
                config.ledger.clone(),
                config.stock.clone(),
            )
            .with_publisher(publisher.clone()),
        );
        let planner = Arc::new(AllocationPlanner::new(ledger.clone(), config.planner.clone()));
        let scheduler = Arc::new(
            RequestScheduler::new(
                planner.clone(),
                repos.request_repo.clone(),
                config.scheduler.clone(),
            )
            .with_publisher(publisher),
        );
        let donations = Arc::new(DonationService::new(
            ledger.clone(),
            repos.donation_repo.clone(),
            config.donation.clone(),
        ));

        Self {
            config,
            repos,
            ledger,
            planner,
            scheduler,
            donations,
        }
    }

    /// 从仓储恢复: 血库 -> 批次 -> active 请求
    pub async fn bootstrap(&self, now: DateTime<Utc>) -> EngineResult<BootstrapSummary> {
        let banks = self.repos.bank_repo.list_banks().await?;
        let bank_count = banks.len();
        for bank in banks {
            self.ledger.register_bank(bank)?;
        }
        let batches = self.ledger.load_from_repository(now).await?;
        let requests = self.scheduler.restore_from_repository().await?;

        let summary = BootstrapSummary {
            banks: bank_count,
            batches,
            requests,
        };
        info!(
            banks = summary.banks,
            batches = summary.batches,
            requests = summary.requests,
            "匹配引擎启动恢复完成"
        );
        Ok(summary)
    }

    /// 登记血库（落库并注册到台账）
    pub async fn register_bank(&self, bank: BloodBank) -> EngineResult<()> {
        if bank.id.trim().is_empty() || bank.name.trim().is_empty() {
            return Err(EngineError::Validation("血库 id 与名称不能为空".to_string()));
        }
        self.repos.bank_repo.upsert_bank(&bank).await?;
        self.ledger.register_bank(bank)
    }

    /// 启动后台任务: 调度循环 + 预留清理
    pub fn start_background(&self) -> BackgroundTasks {
        let scheduler = self.scheduler.spawn();
        let sweeper = self.ledger.spawn_reservation_sweeper(scheduler.subscribe());
        BackgroundTasks { scheduler, sweeper }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repositories(&self) -> &MatchingRepositories {
        &self.repos
    }

    pub fn ledger(&self) -> &Arc<InventoryLedger> {
        &self.ledger
    }

    pub fn planner(&self) -> &Arc<AllocationPlanner> {
        &self.planner
    }

    pub fn scheduler(&self) -> &Arc<RequestScheduler> {
        &self.scheduler
    }

    pub fn donations(&self) -> &Arc<DonationService> {
        &self.donations
    }
}

/// 后台任务句柄
pub struct BackgroundTasks {
    scheduler: SchedulerHandle,
    sweeper: JoinHandle<()>,
}

impl BackgroundTasks {
    /// 停止全部后台任务
    pub async fn shutdown(self) -> EngineResult<()> {
        self.scheduler.shutdown().await?;
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "预留清理任务退出异常");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::blood_bank::GeoPoint;
    use crate::domain::request::BloodRequest;
    use crate::domain::types::{BloodType, RequestStatus, Urgency};
    use chrono::Duration;

    #[tokio::test]
    async fn test_bootstrap_restores_state_from_repositories() {
        let repos = MatchingRepositories::in_memory();
        let now = Utc::now();

        {
            let engine = MatchingEngine::new(
                repos.clone(),
                EngineConfig::default(),
                OptionalEventPublisher::none(),
            );
            engine
                .register_bank(BloodBank::new("bb1", "City General", GeoPoint::new(40.7580, -73.9855)))
                .await
                .unwrap();
            engine
                .ledger()
                .add_batch("bb1", BloodType::APos, 5, now, now + Duration::days(30), now)
                .await
                .unwrap();
            engine
                .scheduler()
                .submit(BloodRequest::new(
                    "recipient-1",
                    BloodType::APos,
                    3,
                    Urgency::High,
                    GeoPoint::new(40.7128, -74.0060),
                    now,
                    now + Duration::days(1),
                ))
                .await
                .unwrap();
        }

        let engine = MatchingEngine::new(repos, EngineConfig::default(), OptionalEventPublisher::none());
        let summary = engine.bootstrap(now).await.unwrap();
        assert_eq!(summary.banks, 1);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.requests, 1);

        let report = engine.scheduler().run_cycle(now).await.unwrap();
        assert_eq!(report.fulfilled.len(), 1);
        let id = &report.fulfilled[0];
        let stored = engine.scheduler().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Fulfilled);
        assert_eq!(engine.ledger().available("bb1", BloodType::APos, now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_register_bank_validation() {
        let engine = MatchingEngine::new(
            MatchingRepositories::in_memory(),
            EngineConfig::default(),
            OptionalEventPublisher::none(),
        );
        let err = engine
            .register_bank(BloodBank::new("", "Nameless", GeoPoint::new(0.0, 0.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_background_tasks_shutdown() {
        let engine = MatchingEngine::new(
            MatchingRepositories::in_memory(),
            EngineConfig::default(),
            OptionalEventPublisher::none(),
        );
        let tasks = engine.start_background();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tasks.shutdown().await.unwrap();
    }
}
