use crate::config::engine_config::{LedgerConfig, StockThresholds};
use crate::domain::blood_bank::{BloodBank, BloodUnit};
use crate::domain::reservation::{BatchHold, Reservation};
use crate::domain::types::{BloodType, ReservationState};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{MatchingEvent, MatchingEventType, OptionalEventPublisher};
use crate::repository::InventoryRepository;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// StockKey - 台账锁粒度
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StockKey {
    pub bank_id: String,
    pub blood_type: BloodType,
}

impl StockKey {
    pub fn new(bank_id: &str, blood_type: BloodType) -> Self {
        Self {
            bank_id: bank_id.to_string(),
            blood_type,
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bank_id, self.blood_type)
    }
}

// ==========================================
// StockEntry - 单个 (血库, 血型) 的库存
// ==========================================
#[derive(Debug, Default)]
pub(super) struct StockEntry {
    /// 按 (expires_at, batch_id) 升序; quantity 为未被预留的数量
    pub(super) batches: Vec<BloodUnit>,
    pub(super) reservations: HashMap<String, Reservation>,
    /// 被自动释放的预留（超时或占用批次过期）
    pub(super) timed_out: HashSet<String>,
}

#[derive(Debug, Default)]
pub(super) struct PurgeOutcome {
    pub(super) removed_batches: Vec<String>,
    pub(super) invalidated: Vec<String>,
}

impl StockEntry {
    fn sort_batches(&mut self) {
        self.batches.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
    }

    pub(super) fn available(&self) -> u32 {
        self.batches.iter().map(|b| b.quantity).sum()
    }

    pub(super) fn reserved(&self) -> u32 {
        self.reservations
            .values()
            .filter(|r| r.is_pending())
            .map(|r| r.quantity())
            .sum()
    }

    /// 最早过期的可用批次
    pub(super) fn earliest_expiry(&self) -> Option<DateTime<Utc>> {
        self.batches
            .iter()
            .find(|b| b.quantity > 0)
            .map(|b| b.expires_at)
    }

    fn held_on(&self, batch_id: &str) -> u32 {
        self.reservations
            .values()
            .filter(|r| r.is_pending())
            .flat_map(|r| r.holds.iter())
            .filter(|h| h.batch_id == batch_id)
            .map(|h| h.quantity)
            .sum()
    }

    /// 批次实际剩余 = 可用 + 仍被 pending 预留占用
    fn physical(&self, batch: &BloodUnit) -> u32 {
        batch.quantity + self.held_on(&batch.batch_id)
    }

    fn return_holds(&mut self, reservation_id: &str) {
        let holds = match self.reservations.get(reservation_id) {
            Some(r) => r.holds.clone(),
            None => return,
        };
        for hold in holds {
            if let Some(batch) = self.batches.iter_mut().find(|b| b.batch_id == hold.batch_id) {
                batch.quantity += hold.quantity;
            }
        }
    }

    fn auto_release(&mut self, reservation_id: &str) {
        self.return_holds(reservation_id);
        if let Some(r) = self.reservations.get_mut(reservation_id) {
            r.state = ReservationState::Released;
        }
        self.timed_out.insert(reservation_id.to_string());
    }

    /// 释放超时预留, 返回被释放的 ID
    pub(super) fn release_timed_out(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let ids: Vec<String> = self
            .reservations
            .values()
            .filter(|r| r.is_timed_out(now))
            .map(|r| r.id.clone())
            .collect();
        for id in &ids {
            self.auto_release(id);
        }
        ids
    }

    /// 清除过期批次; 占用过期批次的 pending 预留先作废
    pub(super) fn purge_expired(&mut self, now: DateTime<Utc>) -> PurgeOutcome {
        let expired: HashSet<String> = self
            .batches
            .iter()
            .filter(|b| b.is_expired(now))
            .map(|b| b.batch_id.clone())
            .collect();
        if expired.is_empty() {
            return PurgeOutcome::default();
        }

        let invalidated: Vec<String> = self
            .reservations
            .values()
            .filter(|r| r.is_pending() && r.holds.iter().any(|h| expired.contains(&h.batch_id)))
            .map(|r| r.id.clone())
            .collect();
        for id in &invalidated {
            self.auto_release(id);
        }

        self.batches.retain(|b| !expired.contains(&b.batch_id));

        PurgeOutcome {
            removed_batches: expired.into_iter().collect(),
            invalidated,
        }
    }

    /// 移除已结束且早于 `before` 过期的预留记录, 返回移除的 ID
    fn prune_finished(&mut self, before: DateTime<Utc>) -> Vec<String> {
        let ids: Vec<String> = self
            .reservations
            .values()
            .filter(|r| !r.is_pending() && r.expires_at < before)
            .map(|r| r.id.clone())
            .collect();
        for id in &ids {
            self.reservations.remove(id);
            self.timed_out.remove(id);
        }
        ids
    }

    /// 提交一组预留后各批次的剩余数量（None 表示批次耗尽）
    ///
    /// 剩余 = 实际数量 - 本组提交的占用; 其他 pending 预留的占用保留
    fn commit_changes(&self, ids: &[String]) -> EngineResult<Vec<(String, Option<u32>)>> {
        let mut taken: BTreeMap<&str, u32> = BTreeMap::new();
        for id in ids {
            let reservation = self
                .reservations
                .get(id)
                .ok_or_else(|| EngineError::ReservationNotFound(id.clone()))?;
            for hold in &reservation.holds {
                *taken.entry(hold.batch_id.as_str()).or_default() += hold.quantity;
            }
        }

        taken
            .into_iter()
            .map(|(batch_id, quantity)| {
                let batch = self
                    .batches
                    .iter()
                    .find(|b| b.batch_id == batch_id)
                    .ok_or_else(|| {
                        EngineError::Internal(format!("预留引用的批次不存在: {}", batch_id))
                    })?;
                let remaining = self.physical(batch).saturating_sub(quantity);
                Ok((batch_id.to_string(), (remaining > 0).then_some(remaining)))
            })
            .collect()
    }

    fn mark_committed(&mut self, reservation_id: &str) -> EngineResult<Reservation> {
        match self.reservations.get_mut(reservation_id) {
            Some(r) => {
                r.state = ReservationState::Committed;
                Ok(r.clone())
            }
            None => Err(EngineError::ReservationNotFound(reservation_id.to_string())),
        }
    }

    /// 移除实际数量归零的批次
    fn drop_emptied(&mut self) {
        let emptied: Vec<String> = self
            .batches
            .iter()
            .filter(|b| self.physical(b) == 0)
            .map(|b| b.batch_id.clone())
            .collect();
        self.batches.retain(|b| !emptied.contains(&b.batch_id));
    }

    fn check_committable(&self, reservation_id: &str) -> EngineResult<()> {
        if self.timed_out.contains(reservation_id) {
            return Err(EngineError::ReservationExpired(reservation_id.to_string()));
        }
        match self.reservations.get(reservation_id) {
            None => Err(EngineError::ReservationNotFound(reservation_id.to_string())),
            Some(r) if r.state != ReservationState::Pending => {
                Err(EngineError::InvalidReservationState {
                    id: reservation_id.to_string(),
                    state: r.state,
                })
            }
            Some(_) => Ok(()),
        }
    }
}

type EntryHandle = Arc<AsyncMutex<StockEntry>>;

// ==========================================
// InventoryLedger - 库存台账
// ==========================================
pub struct InventoryLedger {
    config: LedgerConfig,
    thresholds: StockThresholds,
    repo: Arc<dyn InventoryRepository>,
    publisher: OptionalEventPublisher,
    banks: RwLock<HashMap<String, BloodBank>>,
    pub(super) entries: RwLock<HashMap<StockKey, EntryHandle>>,
    /// reservation_id -> StockKey
    index: Mutex<HashMap<String, StockKey>>,
}

fn poisoned<E: fmt::Display>(e: E) -> EngineError {
    EngineError::Internal(format!("锁获取失败: {}", e))
}

impl InventoryLedger {
    pub fn new(
        repo: Arc<dyn InventoryRepository>,
        config: LedgerConfig,
        thresholds: StockThresholds,
    ) -> Self {
        Self {
            config,
            thresholds,
            repo,
            publisher: OptionalEventPublisher::none(),
            banks: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_publisher(mut self, publisher: OptionalEventPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &StockThresholds {
        &self.thresholds
    }

    // ==========================================
    // 血库注册
    // ==========================================

    /// 注册血库（记录已由注册服务校验）
    pub fn register_bank(&self, bank: BloodBank) -> EngineResult<()> {
        debug!(bank_id = %bank.id, name = %bank.name, "注册血库");
        self.banks.write().map_err(poisoned)?.insert(bank.id.clone(), bank);
        Ok(())
    }

    pub fn bank(&self, bank_id: &str) -> Option<BloodBank> {
        self.banks.read().ok().and_then(|b| b.get(bank_id).cloned())
    }

    /// 全部已注册血库（按 ID 升序）
    pub fn banks(&self) -> Vec<BloodBank> {
        let mut banks: Vec<BloodBank> = self
            .banks
            .read()
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        banks.sort_by(|a, b| a.id.cmp(&b.id));
        banks
    }

    fn ensure_bank(&self, bank_id: &str) -> EngineResult<()> {
        if self.banks.read().map_err(poisoned)?.contains_key(bank_id) {
            Ok(())
        } else {
            Err(EngineError::UnknownBank(bank_id.to_string()))
        }
    }

    // ==========================================
    // 锁与惰性清理
    // ==========================================

    fn entry_for(&self, key: &StockKey, create: bool) -> EngineResult<Option<EntryHandle>> {
        if let Some(entry) = self.entries.read().map_err(poisoned)?.get(key) {
            return Ok(Some(Arc::clone(entry)));
        }
        if !create {
            return Ok(None);
        }
        let mut entries = self.entries.write().map_err(poisoned)?;
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(StockEntry::default())));
        Ok(Some(Arc::clone(entry)))
    }

    pub(super) fn all_entries(&self) -> EngineResult<Vec<(StockKey, EntryHandle)>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut list: Vec<(StockKey, EntryHandle)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(list)
    }

    /// 获取 (血库, 血型) 锁, 等待时间受 lock_timeout 限制
    pub(super) async fn lock_entry(
        &self,
        key: &StockKey,
        entry: EntryHandle,
    ) -> EngineResult<OwnedMutexGuard<StockEntry>> {
        tokio::time::timeout(self.config.lock_timeout(), entry.lock_owned())
            .await
            .map_err(|_| {
                warn!(stock = %key, timeout_ms = self.config.lock_timeout_ms, "库存锁等待超时");
                EngineError::LockTimeout {
                    bank_id: key.bank_id.clone(),
                    blood_type: key.blood_type,
                }
            })
    }

    /// 惰性清理: 超时预留释放 + 过期批次清除, 返回清除的批次数
    pub(super) async fn housekeep(
        &self,
        key: &StockKey,
        entry: &mut StockEntry,
        now: DateTime<Utc>,
    ) -> usize {
        for id in entry.release_timed_out(now) {
            warn!(reservation_id = %id, stock = %key, "预留超时未提交, 已自动释放");
        }

        let pruned = entry.prune_finished(now - self.config.reservation_ttl());
        if !pruned.is_empty() {
            self.forget_reservations(&pruned);
        }

        let purge = entry.purge_expired(now);
        for id in &purge.invalidated {
            warn!(reservation_id = %id, stock = %key, "预留占用的批次已过期, 预留作废");
        }
        for batch_id in &purge.removed_batches {
            info!(batch_id = %batch_id, stock = %key, "清除过期批次");
            if let Err(e) = self.repo.delete_batch(batch_id).await {
                warn!(batch_id = %batch_id, error = %e, "过期批次落库删除失败");
            }
        }
        purge.removed_batches.len()
    }

    fn forget_reservations(&self, ids: &[String]) {
        match self.index.lock() {
            Ok(mut index) => {
                for id in ids {
                    index.remove(id);
                }
                debug!(count = ids.len(), "清理已结束的预留记录");
            }
            Err(e) => warn!(error = %e, "预留索引锁获取失败, 跳过清理"),
        }
    }

    fn key_of(&self, reservation_id: &str) -> EngineResult<StockKey> {
        self.index
            .lock()
            .map_err(poisoned)?
            .get(reservation_id)
            .cloned()
            .ok_or_else(|| EngineError::ReservationNotFound(reservation_id.to_string()))
    }

    // ==========================================
    // 入库
    // ==========================================

    /// 从仓储加载批次（跳过已过期、数量为 0、血库未注册的批次）
    pub async fn load_from_repository(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let units = self.repo.list_batches().await?;
        let mut loaded = 0;

        for unit in units {
            if unit.is_depleted(now) {
                debug!(batch_id = %unit.batch_id, "跳过已耗尽或过期的批次");
                continue;
            }
            if self.ensure_bank(&unit.bank_id).is_err() {
                warn!(batch_id = %unit.batch_id, bank_id = %unit.bank_id, "批次所属血库未注册, 跳过");
                continue;
            }

            let key = StockKey::new(&unit.bank_id, unit.blood_type);
            let entry = self
                .entry_for(&key, true)?
                .ok_or_else(|| EngineError::Internal(format!("台账条目创建失败: {}", key)))?;
            let mut guard = self.lock_entry(&key, entry).await?;
            if guard.batches.iter().any(|b| b.batch_id == unit.batch_id) {
                continue;
            }
            guard.batches.push(unit);
            guard.sort_batches();
            loaded += 1;
        }

        info!(loaded, "库存台账已从仓储加载");
        Ok(loaded)
    }

    /// 新批次入库
    #[instrument(skip(self), fields(bank_id = %bank_id, blood_type = %blood_type))]
    pub async fn add_batch(
        &self,
        bank_id: &str,
        blood_type: BloodType,
        quantity: u32,
        collected_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<BloodUnit> {
        if quantity == 0 {
            return Err(EngineError::Validation("入库数量必须大于 0".to_string()));
        }
        if expires_at <= now {
            return Err(EngineError::Validation(format!(
                "批次已过期: expires_at={}",
                expires_at
            )));
        }
        if collected_at > expires_at {
            return Err(EngineError::Validation(
                "采集时间不能晚于过期时间".to_string(),
            ));
        }
        self.ensure_bank(bank_id)?;

        let unit = BloodUnit {
            batch_id: Uuid::new_v4().to_string(),
            bank_id: bank_id.to_string(),
            blood_type,
            quantity,
            collected_at,
            expires_at,
        };

        let key = StockKey::new(bank_id, blood_type);
        let entry = self
            .entry_for(&key, true)?
            .ok_or_else(|| EngineError::Internal(format!("台账条目创建失败: {}", key)))?;
        let mut guard = self.lock_entry(&key, entry).await?;
        self.housekeep(&key, &mut guard, now).await;

        self.repo.insert_batch(&unit).await?;
        guard.batches.push(unit.clone());
        guard.sort_batches();

        info!(batch_id = %unit.batch_id, quantity, "批次入库");
        self.publisher.publish(MatchingEvent::for_stock(
            MatchingEventType::BatchReceived,
            bank_id,
            blood_type,
            quantity,
            now,
        ));
        Ok(unit)
    }

    // ==========================================
    // 预留 / 提交 / 释放
    // ==========================================

    /// 预留库存（最早过期的批次优先）
    ///
    /// # 返回
    /// - Ok(Reservation): pending 状态的预留
    /// - Err(InsufficientStock): 可用数量不足, 库存不变
    #[instrument(skip(self), fields(bank_id = %bank_id, blood_type = %blood_type))]
    pub async fn reserve(
        &self,
        bank_id: &str,
        blood_type: BloodType,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Reservation> {
        if quantity == 0 {
            return Err(EngineError::Validation("预留数量必须大于 0".to_string()));
        }
        self.ensure_bank(bank_id)?;

        let key = StockKey::new(bank_id, blood_type);
        let entry = match self.entry_for(&key, false)? {
            Some(entry) => entry,
            None => {
                return Err(EngineError::InsufficientStock {
                    bank_id: bank_id.to_string(),
                    blood_type,
                    requested: quantity,
                    available: 0,
                })
            }
        };
        let mut guard = self.lock_entry(&key, entry).await?;
        self.housekeep(&key, &mut guard, now).await;

        let available = guard.available();
        if available < quantity {
            debug!(requested = quantity, available, "库存不足");
            return Err(EngineError::InsufficientStock {
                bank_id: bank_id.to_string(),
                blood_type,
                requested: quantity,
                available,
            });
        }

        let mut remaining = quantity;
        let mut holds = Vec::new();
        for batch in guard.batches.iter_mut() {
            if remaining == 0 {
                break;
            }
            if batch.quantity == 0 {
                continue;
            }
            let take = remaining.min(batch.quantity);
            batch.quantity -= take;
            remaining -= take;
            holds.push(BatchHold {
                batch_id: batch.batch_id.clone(),
                quantity: take,
                expires_at: batch.expires_at,
            });
        }

        let reservation = Reservation {
            id: Uuid::new_v4().to_string(),
            bank_id: bank_id.to_string(),
            blood_type,
            holds,
            state: ReservationState::Pending,
            created_at: now,
            expires_at: now + self.config.reservation_ttl(),
        };
        guard
            .reservations
            .insert(reservation.id.clone(), reservation.clone());
        self.index
            .lock()
            .map_err(poisoned)?
            .insert(reservation.id.clone(), key);

        debug!(
            reservation_id = %reservation.id,
            quantity,
            batches = reservation.holds.len(),
            "预留成功"
        );
        Ok(reservation)
    }

    /// 提交单个预留（永久扣减）
    pub async fn commit(&self, reservation_id: &str, now: DateTime<Utc>) -> EngineResult<Reservation> {
        let mut committed = self.commit_all(&[reservation_id.to_string()], now).await?;
        committed
            .pop()
            .ok_or_else(|| EngineError::ReservationNotFound(reservation_id.to_string()))
    }

    /// 原子提交多个预留
    ///
    /// 按 StockKey 顺序加锁; 全部预留校验通过后, 所有批次变更
    /// 以一次批量写入落库, 写入成功后才修改内存状态。
    /// 任一预留已超时 / 不存在 / 非 pending, 或落库失败, 则全部不提交
    #[instrument(skip(self, reservation_ids), fields(count = reservation_ids.len()))]
    pub async fn commit_all(
        &self,
        reservation_ids: &[String],
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Reservation>> {
        let mut groups: BTreeMap<StockKey, Vec<String>> = BTreeMap::new();
        for id in reservation_ids {
            let key = self.key_of(id)?;
            groups.entry(key).or_default().push(id.clone());
        }

        let mut locked = Vec::with_capacity(groups.len());
        for (key, mut ids) in groups {
            ids.sort();
            ids.dedup();
            let entry = self
                .entry_for(&key, false)?
                .ok_or_else(|| EngineError::ReservationNotFound(ids[0].clone()))?;
            let mut guard = self.lock_entry(&key, entry).await?;
            self.housekeep(&key, &mut guard, now).await;
            locked.push((key, ids, guard));
        }

        // 校验阶段
        for (_, ids, guard) in &locked {
            for id in ids {
                guard.check_committable(id)?;
            }
        }

        // 计算阶段: 各批次提交后的剩余数量
        let mut changes: Vec<(String, Option<u32>)> = Vec::new();
        for (_, ids, guard) in &locked {
            changes.extend(guard.commit_changes(ids)?);
        }

        // 落库阶段: 单次批量写入, 失败时内存与存储均不变
        if let Err(e) = self.repo.apply_batch_quantities(&changes).await {
            warn!(error = %e, batches = changes.len(), "预留提交落库失败, 预留保持 pending");
            return Err(e.into());
        }

        // 生效阶段
        let mut committed = Vec::new();
        for (key, ids, guard) in locked.iter_mut() {
            for id in ids.iter() {
                let reservation = guard.mark_committed(id)?;
                info!(
                    reservation_id = %id,
                    stock = %key,
                    quantity = reservation.quantity(),
                    "预留已提交"
                );
                committed.push(reservation);
            }
            guard.drop_emptied();

            let available = guard.available();
            if available < self.thresholds.critical_below {
                warn!(stock = %key, available, "库存降至危急水位");
                self.publisher.publish(MatchingEvent::for_stock(
                    MatchingEventType::StockCritical,
                    &key.bank_id,
                    key.blood_type,
                    available,
                    now,
                ));
            }
        }

        Ok(committed)
    }

    /// 释放预留, 占用数量回到可用池
    ///
    /// 已被自动释放的预留再次释放视为成功
    pub async fn release(&self, reservation_id: &str, now: DateTime<Utc>) -> EngineResult<Reservation> {
        let key = self.key_of(reservation_id)?;
        let entry = self
            .entry_for(&key, false)?
            .ok_or_else(|| EngineError::ReservationNotFound(reservation_id.to_string()))?;
        let mut guard = self.lock_entry(&key, entry).await?;
        self.housekeep(&key, &mut guard, now).await;

        let state = guard
            .reservations
            .get(reservation_id)
            .map(|r| r.state)
            .ok_or_else(|| EngineError::ReservationNotFound(reservation_id.to_string()))?;

        match state {
            ReservationState::Pending => {
                guard.return_holds(reservation_id);
            }
            ReservationState::Released => {
                debug!(reservation_id = %reservation_id, "预留已释放, 忽略重复释放");
            }
            ReservationState::Committed => {
                return Err(EngineError::InvalidReservationState {
                    id: reservation_id.to_string(),
                    state,
                });
            }
        }

        let reservation = match guard.reservations.get_mut(reservation_id) {
            Some(r) => {
                r.state = ReservationState::Released;
                r.clone()
            }
            None => return Err(EngineError::ReservationNotFound(reservation_id.to_string())),
        };
        debug!(reservation_id = %reservation_id, stock = %key, "预留已释放");
        Ok(reservation)
    }

    /// 尽力释放一组预留（回滚用）, 返回成功释放的数量
    pub async fn release_all(&self, reservation_ids: &[String], now: DateTime<Utc>) -> usize {
        let mut released = 0;
        for id in reservation_ids {
            match self.release(id, now).await {
                Ok(_) => released += 1,
                Err(e) => warn!(reservation_id = %id, error = %e, "回滚释放预留失败"),
            }
        }
        released
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 当前可用数量（不含已预留）
    pub async fn available(
        &self,
        bank_id: &str,
        blood_type: BloodType,
        now: DateTime<Utc>,
    ) -> EngineResult<u32> {
        self.ensure_bank(bank_id)?;
        let key = StockKey::new(bank_id, blood_type);
        let entry = match self.entry_for(&key, false)? {
            Some(entry) => entry,
            None => return Ok(0),
        };
        let mut guard = self.lock_entry(&key, entry).await?;
        self.housekeep(&key, &mut guard, now).await;
        Ok(guard.available())
    }

    /// 可用库存中最早的过期时间
    pub async fn earliest_expiry(
        &self,
        bank_id: &str,
        blood_type: BloodType,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        self.ensure_bank(bank_id)?;
        let key = StockKey::new(bank_id, blood_type);
        let entry = match self.entry_for(&key, false)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let mut guard = self.lock_entry(&key, entry).await?;
        self.housekeep(&key, &mut guard, now).await;
        Ok(guard.earliest_expiry())
    }

    /// 当前有可用数量的批次（按过期时间升序, quantity 为可用数量）
    pub async fn available_batches(
        &self,
        bank_id: &str,
        blood_type: BloodType,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<BloodUnit>> {
        self.ensure_bank(bank_id)?;
        let key = StockKey::new(bank_id, blood_type);
        let entry = match self.entry_for(&key, false)? {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };
        let mut guard = self.lock_entry(&key, entry).await?;
        self.housekeep(&key, &mut guard, now).await;
        Ok(guard
            .batches
            .iter()
            .filter(|b| b.quantity > 0)
            .cloned()
            .collect())
    }

    /// 查询预留当前状态
    pub async fn reservation(&self, reservation_id: &str) -> EngineResult<Option<Reservation>> {
        let key = match self.key_of(reservation_id) {
            Ok(key) => key,
            Err(EngineError::ReservationNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let entry = match self.entry_for(&key, false)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let guard = self.lock_entry(&key, entry).await?;
        Ok(guard.reservations.get(reservation_id).cloned())
    }

    // ==========================================
    // 后台清理
    // ==========================================

    /// 清除所有条目中的过期批次, 返回清除的批次数
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let mut removed = 0;
        for (key, entry) in self.all_entries()? {
            match self.lock_entry(&key, entry).await {
                Ok(mut guard) => removed += self.housekeep(&key, &mut guard, now).await,
                Err(e) => warn!(stock = %key, error = %e, "清理过期批次时跳过条目"),
            }
        }
        Ok(removed)
    }

    /// 释放所有超时预留, 并清理已结束的旧预留记录
    ///
    /// # 返回
    /// 本次自动释放的预留数
    pub async fn sweep_expired_reservations(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let retain_until = now - self.config.reservation_ttl();
        let mut released = 0;
        let mut pruned = Vec::new();

        for (key, entry) in self.all_entries()? {
            let mut guard = match self.lock_entry(&key, entry).await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(stock = %key, error = %e, "清理超时预留时跳过条目");
                    continue;
                }
            };
            for id in guard.release_timed_out(now) {
                warn!(reservation_id = %id, stock = %key, "预留超时未提交, 已自动释放");
                released += 1;
            }
            pruned.extend(guard.prune_finished(retain_until));
        }

        if !pruned.is_empty() {
            self.forget_reservations(&pruned);
        }

        Ok(released)
    }

    /// 启动后台清理任务（超时预留 + 过期批次）
    pub fn spawn_reservation_sweeper(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        let period = std::time::Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            info!(interval_secs = period.as_secs(), "预留清理任务已启动");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        match ledger.sweep_expired_reservations(now).await {
                            Ok(0) => {}
                            Ok(n) => info!(released = n, "自动释放超时预留"),
                            Err(e) => warn!(error = %e, "清理超时预留失败"),
                        }
                        if let Err(e) = ledger.purge_expired(now).await {
                            warn!(error = %e, "清除过期批次失败");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("预留清理任务已停止");
        })
    }
}
