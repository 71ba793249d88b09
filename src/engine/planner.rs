// ==========================================
// 血液供应匹配引擎 - 分配规划引擎
// ==========================================
// 职责: 为单个用血请求生成并执行分配方案
// 输入: 请求 + 候选血库
// 输出: 已提交的 AllocationPlan 或 Unfulfillable
// 红线:
// - 先按相容血型优先顺序, 再按 (距离, 最早过期, 血库ID) 遍历血库
// - 未满足需求时全部回滚（除非允许部分满足）
// - 提交前所有预留都已成功
// ==========================================

use crate::config::engine_config::PlannerConfig;
use crate::domain::blood_bank::BloodBank;
use crate::domain::plan::{AllocationPlan, AllocationSegment};
use crate::domain::request::BloodRequest;
use crate::domain::reservation::Reservation;
use crate::domain::types::BloodType;
use crate::domain::BloodUnit;
use crate::engine::compatibility::compatible_donors;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::InventoryLedger;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 某血型下的候选血库
#[derive(Debug, Clone)]
struct Candidate<'a> {
    bank: &'a BloodBank,
    distance_km: f64,
    earliest_expiry: DateTime<Utc>,
    batches: Vec<BloodUnit>,
}

impl Candidate<'_> {
    fn available(&self) -> u32 {
        self.batches.iter().map(|b| b.quantity).sum()
    }
}

/// 候选血库排序: 距离升序 -> 最早过期升序 -> 血库ID升序
fn compare_candidates(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.earliest_expiry.cmp(&b.earliest_expiry))
        .then_with(|| a.bank.id.cmp(&b.bank.id))
}

// ==========================================
// AllocationPlanner - 分配规划引擎
// ==========================================
pub struct AllocationPlanner {
    ledger: Arc<InventoryLedger>,
    config: PlannerConfig,
}

impl AllocationPlanner {
    pub fn new(ledger: Arc<InventoryLedger>, config: PlannerConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<InventoryLedger> {
        &self.ledger
    }

    /// 生成并提交分配方案
    ///
    /// # 参数
    /// - `request`: 用血请求（按 outstanding_units 规划）
    /// - `banks`: 候选血库
    /// - `now`: 当前时刻
    ///
    /// # 返回
    /// - Ok(plan): 已提交; shortfall > 0 仅在 allow_partial 时出现
    /// - Err(Unfulfillable): 可达库存不足, 所有预留已释放
    /// - Err(其他): 锁超时 / 存储失败, 所有预留已释放
    #[instrument(skip(self, request, banks), fields(
        request_id = %request.id,
        blood_type = %request.blood_type,
        outstanding = request.outstanding_units(),
        banks = banks.len()
    ))]
    pub async fn plan(
        &self,
        request: &BloodRequest,
        banks: &[BloodBank],
        now: DateTime<Utc>,
    ) -> EngineResult<AllocationPlan> {
        let demand = Self::demand_of(request)?;

        let mut remaining = demand;
        let mut held: Vec<(Reservation, f64)> = Vec::new();

        for donor in compatible_donors(request.blood_type) {
            if remaining == 0 {
                break;
            }
            let candidates = match self.rank_candidates(request, banks, donor, now).await {
                Ok(c) => c,
                Err(e) => return Err(self.rollback(&held, now, e).await),
            };

            for candidate in candidates {
                if remaining == 0 {
                    break;
                }
                let want = remaining.min(candidate.available());
                match self
                    .reserve_with_retry(&candidate.bank.id, donor, want, now)
                    .await
                {
                    Ok(Some(reservation)) => {
                        remaining -= reservation.quantity();
                        held.push((reservation, candidate.distance_km));
                    }
                    Ok(None) => {}
                    Err(e) => return Err(self.rollback(&held, now, e).await),
                }
            }
        }

        let reachable = demand - remaining;
        if remaining > 0 && (!self.config.allow_partial || reachable == 0) {
            info!(requested = demand, reachable, "可达库存不足, 回滚全部预留");
            let err = EngineError::Unfulfillable {
                request_id: request.id.clone(),
                requested: demand,
                reachable,
            };
            return Err(self.rollback(&held, now, err).await);
        }

        let ids: Vec<String> = held.iter().map(|(r, _)| r.id.clone()).collect();
        if let Err(e) = self.ledger.commit_all(&ids, now).await {
            return Err(self.rollback(&held, now, e).await);
        }

        let segments = held
            .iter()
            .flat_map(|(r, distance_km)| {
                r.holds.iter().map(move |h| AllocationSegment {
                    bank_id: r.bank_id.clone(),
                    blood_type: r.blood_type,
                    quantity: h.quantity,
                    batch_ref: h.batch_id.clone(),
                    expires_at: h.expires_at,
                    distance_km: *distance_km,
                })
            })
            .collect::<Vec<_>>();

        let plan = AllocationPlan {
            request_id: request.id.clone(),
            segments,
            shortfall: remaining,
        };
        if plan.is_partial() {
            warn!(allocated = reachable, shortfall = remaining, "提交部分分配方案");
        } else {
            info!(
                allocated = reachable,
                segments = plan.segments.len(),
                cross_type = plan.uses_cross_type(request.blood_type),
                "分配方案已提交"
            );
        }
        Ok(plan)
    }

    /// 试算分配方案（不预留、不提交）
    ///
    /// 与 plan 使用相同的遍历顺序; 无论是否允许部分满足都报告缺口
    pub async fn preview(
        &self,
        request: &BloodRequest,
        banks: &[BloodBank],
        now: DateTime<Utc>,
    ) -> EngineResult<AllocationPlan> {
        let demand = Self::demand_of(request)?;
        let mut remaining = demand;
        let mut segments = Vec::new();

        for donor in compatible_donors(request.blood_type) {
            if remaining == 0 {
                break;
            }
            for candidate in self.rank_candidates(request, banks, donor, now).await? {
                for batch in &candidate.batches {
                    if remaining == 0 {
                        break;
                    }
                    let take = remaining.min(batch.quantity);
                    remaining -= take;
                    segments.push(AllocationSegment {
                        bank_id: candidate.bank.id.clone(),
                        blood_type: donor,
                        quantity: take,
                        batch_ref: batch.batch_id.clone(),
                        expires_at: batch.expires_at,
                        distance_km: candidate.distance_km,
                    });
                }
            }
        }

        Ok(AllocationPlan {
            request_id: request.id.clone(),
            segments,
            shortfall: remaining,
        })
    }

    // ==========================================
    // 内部方法
    // ==========================================

    fn demand_of(request: &BloodRequest) -> EngineResult<u32> {
        if !request.is_active() {
            return Err(EngineError::Validation(format!(
                "请求不是 active 状态: {} ({})",
                request.id, request.status
            )));
        }
        match request.outstanding_units() {
            0 => Err(EngineError::Validation(format!(
                "请求没有待分配数量: {}",
                request.id
            ))),
            n => Ok(n),
        }
    }

    /// 收集某供血血型的候选血库并排序
    async fn rank_candidates<'a>(
        &self,
        request: &BloodRequest,
        banks: &'a [BloodBank],
        donor: BloodType,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Candidate<'a>>> {
        let mut candidates = Vec::new();

        for bank in banks {
            let distance_km = bank.distance_from(&request.location);
            if let Some(max) = self.config.max_distance_km {
                if distance_km > max {
                    continue;
                }
            }

            let batches = match self.ledger.available_batches(&bank.id, donor, now).await {
                Ok(b) => b,
                Err(EngineError::UnknownBank(id)) => {
                    warn!(bank_id = %id, "候选血库未在台账注册, 跳过");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let earliest_expiry = match batches.first() {
                Some(b) => b.expires_at,
                None => continue,
            };
            candidates.push(Candidate {
                bank,
                distance_km,
                earliest_expiry,
                batches,
            });
        }

        candidates.sort_by(compare_candidates);
        debug!(donor = %donor, candidates = candidates.len(), "候选血库排序完成");
        Ok(candidates)
    }

    /// 预留; 读与预留之间库存被抢占时按新可用量重试一次
    async fn reserve_with_retry(
        &self,
        bank_id: &str,
        blood_type: BloodType,
        want: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<Reservation>> {
        if want == 0 {
            return Ok(None);
        }
        match self.ledger.reserve(bank_id, blood_type, want, now).await {
            Ok(r) => Ok(Some(r)),
            Err(EngineError::InsufficientStock { available, .. }) => {
                let retry = want.min(available);
                if retry == 0 {
                    return Ok(None);
                }
                debug!(bank_id, blood_type = %blood_type, want, retry, "库存被抢占, 按新可用量重试");
                match self.ledger.reserve(bank_id, blood_type, retry, now).await {
                    Ok(r) => Ok(Some(r)),
                    Err(EngineError::InsufficientStock { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// 释放本次规划持有的全部预留, 原样返回错误
    async fn rollback(
        &self,
        held: &[(Reservation, f64)],
        now: DateTime<Utc>,
        err: EngineError,
    ) -> EngineError {
        if !held.is_empty() {
            let ids: Vec<String> = held.iter().map(|(r, _)| r.id.clone()).collect();
            let released = self.ledger.release_all(&ids, now).await;
            debug!(released, total = ids.len(), error = %err, "规划回滚");
        }
        err
    }
}
