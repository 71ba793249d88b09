use super::queue::{QueueEntry, RequestQueue};
use super::report::{CycleReport, FailureStage, QueueStats, RequestFailure};
use crate::config::engine_config::SchedulerConfig;
use crate::domain::plan::AllocationPlan;
use crate::domain::request::BloodRequest;
use crate::domain::types::RequestStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{MatchingEvent, MatchingEventType, OptionalEventPublisher};
use crate::engine::planner::AllocationPlanner;
use crate::repository::BloodRequestRepository;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Default)]
struct SchedulerState {
    /// 调度器跟踪的全部 active 请求（排队 / 规划中 / 挂起）
    requests: HashMap<String, BloodRequest>,
    queue: RequestQueue,
    stalled: BTreeSet<String>,
}

/// 单个请求的分派结果
enum Outcome {
    Planned(AllocationPlan),
    Failed(EngineError),
}

// ==========================================
// RequestScheduler - 请求调度器
// ==========================================
pub struct RequestScheduler {
    planner: Arc<AllocationPlanner>,
    request_repo: Arc<dyn BloodRequestRepository>,
    config: SchedulerConfig,
    publisher: OptionalEventPublisher,
    state: Mutex<SchedulerState>,
}

impl RequestScheduler {
    pub fn new(
        planner: Arc<AllocationPlanner>,
        request_repo: Arc<dyn BloodRequestRepository>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            planner,
            request_repo,
            config,
            publisher: OptionalEventPublisher::none(),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn with_publisher(mut self, publisher: OptionalEventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn state(&self) -> EngineResult<MutexGuard<'_, SchedulerState>> {
        self.state
            .lock()
            .map_err(|e| EngineError::Internal(format!("调度器状态锁获取失败: {}", e)))
    }

    // ==========================================
    // 请求生命周期
    // ==========================================

    /// 提交用血请求（先落库, 再入队）
    ///
    /// # 返回
    /// 入队的请求（status=active）
    #[instrument(skip(self, request), fields(request_id = %request.id, urgency = %request.urgency))]
    pub async fn submit(&self, request: BloodRequest) -> EngineResult<BloodRequest> {
        if !request.is_active() {
            return Err(EngineError::Validation(format!(
                "只能提交 active 请求: status={}",
                request.status
            )));
        }
        if request.units_needed == 0 {
            return Err(EngineError::Validation("units_needed 必须大于 0".to_string()));
        }
        if request.required_by <= request.date_requested {
            return Err(EngineError::Validation(
                "required_by 必须晚于 date_requested".to_string(),
            ));
        }
        let already_tracked = self.state()?.requests.contains_key(&request.id);
        if already_tracked {
            return Err(EngineError::Validation(format!(
                "请求已在调度中: {}",
                request.id
            )));
        }

        self.request_repo.upsert_request(&request).await?;

        let mut state = self.state()?;
        state.queue.push(QueueEntry::of(&request));
        state.requests.insert(request.id.clone(), request.clone());
        info!(
            blood_type = %request.blood_type,
            units = request.units_needed,
            queued = state.queue.len(),
            "用血请求已入队"
        );
        Ok(request)
    }

    /// 取消请求
    pub async fn cancel(&self, request_id: &str, now: DateTime<Utc>) -> EngineResult<BloodRequest> {
        let tracked = self.state()?.requests.get(request_id).cloned();
        let mut request = match tracked {
            Some(r) => r,
            None => match self.request_repo.find_request(request_id).await? {
                Some(r) if r.status.is_terminal() => {
                    return Err(EngineError::InvalidStateTransition {
                        from: r.status.to_string(),
                        to: RequestStatus::Cancelled.to_string(),
                    })
                }
                Some(r) => r,
                None => return Err(EngineError::RequestNotFound(request_id.to_string())),
            },
        };

        request.status = RequestStatus::Cancelled;
        self.request_repo.upsert_request(&request).await?;
        {
            let mut state = self.state()?;
            state.requests.remove(request_id);
            state.queue.remove(request_id);
            state.stalled.remove(request_id);
        }

        info!(request_id, "用血请求已取消");
        self.publisher.publish(MatchingEvent::for_request(
            MatchingEventType::RequestCancelled,
            request_id,
            request.blood_type,
            None,
            now,
        ));
        Ok(request)
    }

    /// 查询请求（调度中的优先, 其次查仓储）
    pub async fn get(&self, request_id: &str) -> EngineResult<Option<BloodRequest>> {
        let tracked = self.state()?.requests.get(request_id).cloned();
        match tracked {
            Some(r) => Ok(Some(r)),
            None => Ok(self.request_repo.find_request(request_id).await?),
        }
    }

    /// 挂起中的请求（按请求时间升序）
    pub fn stalled_requests(&self) -> EngineResult<Vec<BloodRequest>> {
        let state = self.state()?;
        let mut list: Vec<BloodRequest> = state
            .stalled
            .iter()
            .filter_map(|id| state.requests.get(id).cloned())
            .collect();
        list.sort_by(|a, b| a.date_requested.cmp(&b.date_requested));
        Ok(list)
    }

    /// 挂起请求重新入队, 失败计数清零
    pub async fn requeue_stalled(&self) -> EngineResult<usize> {
        let revived: Vec<BloodRequest> = {
            let mut guard = self.state()?;
            let state = &mut *guard;
            let ids: Vec<String> = std::mem::take(&mut state.stalled).into_iter().collect();
            let mut revived = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(r) = state.requests.get_mut(&id) {
                    r.attempts = 0;
                    let entry = QueueEntry::of(r);
                    revived.push(r.clone());
                    state.queue.push(entry);
                }
            }
            revived
        };

        for request in &revived {
            if let Err(e) = self.request_repo.upsert_request(request).await {
                warn!(request_id = %request.id, error = %e, "重新入队时更新失败计数未落库");
            }
        }
        if !revived.is_empty() {
            info!(count = revived.len(), "挂起请求已重新入队");
        }
        Ok(revived.len())
    }

    /// 从仓储恢复 active 请求（启动时调用）
    pub async fn restore_from_repository(&self) -> EngineResult<usize> {
        let active = self.request_repo.list_by_status(RequestStatus::Active).await?;
        let mut state = self.state()?;
        let mut restored = 0;

        for request in active {
            if state.requests.contains_key(&request.id) {
                continue;
            }
            if request.attempts >= self.config.max_attempts {
                state.stalled.insert(request.id.clone());
            } else {
                state.queue.push(QueueEntry::of(&request));
            }
            state.requests.insert(request.id.clone(), request);
            restored += 1;
        }

        info!(restored, stalled = state.stalled.len(), "已从仓储恢复 active 请求");
        Ok(restored)
    }

    pub fn queue_stats(&self) -> EngineResult<QueueStats> {
        let state = self.state()?;
        let mut stats = QueueStats {
            active: state.requests.len(),
            queued: state.queue.len(),
            stalled: state.stalled.len(),
            ..QueueStats::default()
        };
        for request in state.requests.values() {
            if state.queue.contains(&request.id) {
                *stats.queued_by_urgency.entry(request.urgency).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    // ==========================================
    // 调度周期
    // ==========================================

    /// 执行一个调度周期
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> EngineResult<CycleReport> {
        let mut report = CycleReport::new(now);

        self.expire_overdue(now, &mut report).await?;

        let batch: Vec<BloodRequest> = {
            let mut guard = self.state()?;
            let state = &mut *guard;
            let entries = state.queue.drain_ordered();
            entries
                .into_iter()
                .filter_map(|e| state.requests.get(&e.request_id).cloned())
                .collect()
        };
        if batch.is_empty() {
            debug!("队列为空, 跳过分派");
            return Ok(report);
        }

        let banks = self.planner.ledger().banks();
        let planner = Arc::clone(&self.planner);
        let concurrency = self.config.dispatch_concurrency.max(1);
        info!(dispatch = batch.len(), concurrency, "开始分派请求");

        // buffered: 按优先顺序启动, 结果按同一顺序返回
        let outcomes: Vec<(BloodRequest, Outcome)> = stream::iter(batch)
            .map(|request| {
                let planner = Arc::clone(&planner);
                let banks = banks.clone();
                async move {
                    let outcome = match planner.plan(&request, &banks, now).await {
                        Ok(plan) => Outcome::Planned(plan),
                        Err(e) => Outcome::Failed(e),
                    };
                    (request, outcome)
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        for (request, outcome) in outcomes {
            match outcome {
                Outcome::Planned(plan) => self.apply_plan(request, plan, now, &mut report).await?,
                Outcome::Failed(err) => self.apply_failure(request, err, now, &mut report).await?,
            }
        }

        info!(
            fulfilled = report.fulfilled.len(),
            partial = report.partial.len(),
            deferred = report.deferred.len(),
            stalled = report.stalled.len(),
            expired = report.expired.len(),
            failures = report.failures.len(),
            "调度周期完成"
        );
        Ok(report)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>, report: &mut CycleReport) -> EngineResult<()> {
        let expired: Vec<BloodRequest> = {
            let mut guard = self.state()?;
            let state = &mut *guard;
            let ids: Vec<String> = state
                .requests
                .values()
                .filter(|r| r.is_overdue(now))
                .map(|r| r.id.clone())
                .collect();
            let mut expired = Vec::with_capacity(ids.len());
            for id in ids {
                state.queue.remove(&id);
                state.stalled.remove(&id);
                if let Some(mut r) = state.requests.remove(&id) {
                    r.status = RequestStatus::Expired;
                    expired.push(r);
                }
            }
            expired
        };

        for request in expired {
            info!(request_id = %request.id, required_by = %request.required_by, "请求已过期");
            self.persist(&request, report).await;
            self.publisher.publish(MatchingEvent::for_request(
                MatchingEventType::RequestExpired,
                &request.id,
                request.blood_type,
                Some(request.outstanding_units()),
                now,
            ));
            report.expired.push(request.id);
        }
        Ok(())
    }

    async fn apply_plan(
        &self,
        mut request: BloodRequest,
        plan: AllocationPlan,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> EngineResult<()> {
        let allocated = plan.total_quantity();
        request.units_fulfilled += allocated;
        let finished = !plan.is_partial();

        let still_tracked = {
            let mut guard = self.state()?;
            let state = &mut *guard;
            match state.requests.get_mut(&request.id) {
                Some(tracked) => {
                    tracked.units_fulfilled = request.units_fulfilled;
                    if finished {
                        state.requests.remove(&request.id);
                    } else {
                        state.queue.push(QueueEntry::of(&request));
                    }
                    true
                }
                None => false,
            }
        };
        if !still_tracked {
            // 规划期间被取消或过期: 分配已提交, 只记录
            warn!(request_id = %request.id, allocated, "请求在规划期间已离开调度, 分配已提交");
            report.plans.push(plan);
            return Ok(());
        }

        if finished {
            request.status = RequestStatus::Fulfilled;
            self.persist(&request, report).await;
            self.publisher.publish(MatchingEvent::for_request(
                MatchingEventType::RequestFulfilled,
                &request.id,
                request.blood_type,
                Some(allocated),
                now,
            ));
            report.fulfilled.push(request.id.clone());
        } else {
            self.persist(&request, report).await;
            self.publisher.publish(MatchingEvent::for_request(
                MatchingEventType::RequestPartiallyFulfilled,
                &request.id,
                request.blood_type,
                Some(allocated),
                now,
            ));
            report.partial.push(request.id.clone());
        }
        report.plans.push(plan);
        Ok(())
    }

    async fn apply_failure(
        &self,
        mut request: BloodRequest,
        err: EngineError,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> EngineResult<()> {
        request.attempts += 1;
        let stall = !err.is_retryable() || request.attempts >= self.config.max_attempts;

        let still_tracked = {
            let mut guard = self.state()?;
            let state = &mut *guard;
            match state.requests.get_mut(&request.id) {
                Some(tracked) => {
                    tracked.attempts = request.attempts;
                    if stall {
                        state.stalled.insert(request.id.clone());
                    } else {
                        state.queue.push(QueueEntry::of(&request));
                    }
                    true
                }
                None => false,
            }
        };
        if !still_tracked {
            return Ok(());
        }

        match &err {
            EngineError::Unfulfillable { .. } => {
                debug!(request_id = %request.id, attempts = request.attempts, error = %err, "库存不足, 请求延后");
                report.deferred.push(request.id.clone());
            }
            _ => {
                error!(request_id = %request.id, attempts = request.attempts, error = %err, "请求规划失败");
                report.failures.push(RequestFailure {
                    request_id: request.id.clone(),
                    stage: FailureStage::Planning,
                    error: err.to_string(),
                });
            }
        }

        if stall {
            warn!(
                request_id = %request.id,
                attempts = request.attempts,
                max_attempts = self.config.max_attempts,
                last_error = %err,
                "请求重试已耗尽, 挂起等待人工处理"
            );
            self.publisher.publish(MatchingEvent::for_request(
                MatchingEventType::RequestStalled,
                &request.id,
                request.blood_type,
                Some(request.outstanding_units()),
                now,
            ));
            report.stalled.push(request.id.clone());
        }

        self.persist(&request, report).await;
        Ok(())
    }

    /// 落库; 失败只写入报告
    async fn persist(&self, request: &BloodRequest, report: &mut CycleReport) {
        if let Err(e) = self.request_repo.upsert_request(request).await {
            error!(request_id = %request.id, status = %request.status, error = %e, "请求状态落库失败");
            report.failures.push(RequestFailure {
                request_id: request.id.clone(),
                stage: FailureStage::Persistence,
                error: e.to_string(),
            });
        }
    }

    // ==========================================
    // 后台循环
    // ==========================================

    /// 启动后台调度循环
    pub fn spawn(self: &Arc<Self>) -> SchedulerHandle {
        let scheduler = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = std::time::Duration::from_secs(self.config.cycle_interval_secs.max(1));

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            info!(interval_secs = period.as_secs(), "调度循环已启动");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.run_cycle(Utc::now()).await {
                            error!(error = %e, "调度周期异常, 下个周期继续");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("调度循环已停止");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// 后台调度循环句柄
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// 发出停止信号并等待当前周期结束
    pub async fn shutdown(self) -> EngineResult<()> {
        let _ = self.shutdown.send(true);
        self.join
            .await
            .map_err(|e| EngineError::Internal(format!("调度循环退出异常: {}", e)))
    }

    /// 共享的停止信号（供其他后台任务使用）
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
