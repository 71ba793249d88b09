use super::core::{InventoryLedger, StockKey};
use crate::config::engine_config::{LedgerConfig, StockThresholds};
use crate::domain::blood_bank::{BloodBank, GeoPoint};
use crate::domain::types::{BloodType, ReservationState, StockLevel};
use crate::engine::error::EngineError;
use crate::engine::events::{MatchingEventType, OptionalEventPublisher, RecordingEventPublisher};
use crate::repository::memory_repo::InMemoryInventoryRepository;
use crate::repository::InventoryRepository;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn setup(config: LedgerConfig) -> (Arc<InventoryLedger>, Arc<InMemoryInventoryRepository>) {
    let repo = Arc::new(InMemoryInventoryRepository::new());
    let ledger = InventoryLedger::new(repo.clone(), config, StockThresholds::default());
    ledger
        .register_bank(BloodBank::new("bb1", "City General", GeoPoint::new(40.7580, -73.9855)))
        .unwrap();
    ledger
        .register_bank(BloodBank::new("bb2", "Metropolitan", GeoPoint::new(40.7505, -73.9934)))
        .unwrap();
    (Arc::new(ledger), repo)
}

async fn add(ledger: &InventoryLedger, bank: &str, t: BloodType, qty: u32, days: i64) -> String {
    ledger
        .add_batch(bank, t, qty, t0() - Duration::days(1), t0() + Duration::days(days), t0())
        .await
        .unwrap()
        .batch_id
}

#[tokio::test]
async fn test_reserve_consumes_earliest_expiry_first() {
    let (ledger, _) = setup(LedgerConfig::default());
    let late = add(&ledger, "bb1", BloodType::OPos, 5, 20).await;
    let early = add(&ledger, "bb1", BloodType::OPos, 10, 3).await;

    let r = ledger.reserve("bb1", BloodType::OPos, 12, t0()).await.unwrap();

    assert_eq!(r.state, ReservationState::Pending);
    assert_eq!(r.holds.len(), 2);
    assert_eq!(r.holds[0].batch_id, early);
    assert_eq!(r.holds[0].quantity, 10);
    assert_eq!(r.holds[1].batch_id, late);
    assert_eq!(r.holds[1].quantity, 2);
    assert_eq!(ledger.available("bb1", BloodType::OPos, t0()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_inventory_unchanged() {
    let (ledger, _) = setup(LedgerConfig::default());
    add(&ledger, "bb1", BloodType::ANeg, 4, 10).await;

    let err = ledger.reserve("bb1", BloodType::ANeg, 5, t0()).await.unwrap_err();
    match err {
        EngineError::InsufficientStock { requested, available, .. } => {
            assert_eq!(requested, 5);
            assert_eq!(available, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ledger.available("bb1", BloodType::ANeg, t0()).await.unwrap(), 4);

    // 该血型从未入库
    let err = ledger.reserve("bb1", BloodType::BNeg, 1, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock { available: 0, .. }));
}

#[tokio::test]
async fn test_reserve_release_restores_availability() {
    let (ledger, _) = setup(LedgerConfig::default());
    add(&ledger, "bb1", BloodType::BPos, 8, 10).await;

    let r = ledger.reserve("bb1", BloodType::BPos, 6, t0()).await.unwrap();
    assert_eq!(ledger.available("bb1", BloodType::BPos, t0()).await.unwrap(), 2);

    let released = ledger.release(&r.id, t0()).await.unwrap();
    assert_eq!(released.state, ReservationState::Released);
    assert_eq!(ledger.available("bb1", BloodType::BPos, t0()).await.unwrap(), 8);

    // 重复释放不报错, 也不重复归还
    ledger.release(&r.id, t0()).await.unwrap();
    assert_eq!(ledger.available("bb1", BloodType::BPos, t0()).await.unwrap(), 8);
}

#[tokio::test]
async fn test_commit_is_permanent_and_written_through() {
    let (ledger, repo) = setup(LedgerConfig::default());
    let first = add(&ledger, "bb1", BloodType::APos, 5, 3).await;
    let second = add(&ledger, "bb1", BloodType::APos, 10, 9).await;

    let r = ledger.reserve("bb1", BloodType::APos, 7, t0()).await.unwrap();
    let committed = ledger.commit(&r.id, t0()).await.unwrap();
    assert_eq!(committed.state, ReservationState::Committed);
    assert_eq!(ledger.available("bb1", BloodType::APos, t0()).await.unwrap(), 8);

    // 第一批耗尽后删除, 第二批剩 8
    assert_eq!(repo.stored_quantity(&first), None);
    assert_eq!(repo.stored_quantity(&second), Some(8));

    // 已提交的预留不能释放
    let err = ledger.release(&r.id, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidReservationState { .. }));
}

#[tokio::test]
async fn test_commit_keeps_other_pending_holds_in_storage() {
    let (ledger, repo) = setup(LedgerConfig::default());
    let batch = add(&ledger, "bb1", BloodType::OPos, 10, 5).await;

    let a = ledger.reserve("bb1", BloodType::OPos, 4, t0()).await.unwrap();
    let b = ledger.reserve("bb1", BloodType::OPos, 3, t0()).await.unwrap();
    ledger.commit(&a.id, t0()).await.unwrap();

    // 仍被 b 占用的 3 单位不能从存储中扣掉
    assert_eq!(repo.stored_quantity(&batch), Some(6));
    ledger.release(&b.id, t0()).await.unwrap();
    assert_eq!(ledger.available("bb1", BloodType::OPos, t0()).await.unwrap(), 6);
}

#[tokio::test]
async fn test_timed_out_reservation_auto_released() {
    let config = LedgerConfig {
        reservation_ttl_secs: 60,
        ..LedgerConfig::default()
    };
    let (ledger, _) = setup(config);
    add(&ledger, "bb1", BloodType::ONeg, 6, 10).await;

    let r = ledger.reserve("bb1", BloodType::ONeg, 6, t0()).await.unwrap();
    let later = t0() + Duration::seconds(61);

    assert_eq!(ledger.available("bb1", BloodType::ONeg, later).await.unwrap(), 6);
    let err = ledger.commit(&r.id, later).await.unwrap_err();
    assert!(matches!(err, EngineError::ReservationExpired(_)));

    let state = ledger.reservation(&r.id).await.unwrap().unwrap().state;
    assert_eq!(state, ReservationState::Released);
}

#[tokio::test]
async fn test_sweeper_releases_timed_out_reservations() {
    let config = LedgerConfig {
        reservation_ttl_secs: 30,
        ..LedgerConfig::default()
    };
    let (ledger, _) = setup(config);
    add(&ledger, "bb1", BloodType::AbPos, 3, 10).await;
    add(&ledger, "bb2", BloodType::AbPos, 4, 10).await;

    let a = ledger.reserve("bb1", BloodType::AbPos, 3, t0()).await.unwrap();
    let b = ledger.reserve("bb2", BloodType::AbPos, 2, t0() + Duration::seconds(20)).await.unwrap();

    let released = ledger
        .sweep_expired_reservations(t0() + Duration::seconds(40))
        .await
        .unwrap();
    assert_eq!(released, 1);
    assert_eq!(
        ledger.reservation(&a.id).await.unwrap().unwrap().state,
        ReservationState::Released
    );
    assert!(ledger.reservation(&b.id).await.unwrap().unwrap().is_pending());
}

#[tokio::test]
async fn test_expired_batches_purged_and_never_reserved() {
    let (ledger, repo) = setup(LedgerConfig::default());
    let short = add(&ledger, "bb1", BloodType::BNeg, 5, 1).await;
    add(&ledger, "bb1", BloodType::BNeg, 2, 10).await;

    let later = t0() + Duration::days(2);
    assert_eq!(ledger.available("bb1", BloodType::BNeg, later).await.unwrap(), 2);
    assert_eq!(repo.stored_quantity(&short), None);

    let err = ledger.reserve("bb1", BloodType::BNeg, 3, later).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientStock { available: 2, .. }));
}

#[tokio::test]
async fn test_reservation_on_expired_batch_is_invalidated() {
    let (ledger, _) = setup(LedgerConfig {
        reservation_ttl_secs: 7 * 24 * 3600,
        ..LedgerConfig::default()
    });
    add(&ledger, "bb1", BloodType::APos, 4, 1).await;

    let r = ledger.reserve("bb1", BloodType::APos, 4, t0()).await.unwrap();
    let err = ledger.commit(&r.id, t0() + Duration::days(2)).await.unwrap_err();
    assert!(matches!(err, EngineError::ReservationExpired(_)));
}

#[tokio::test]
async fn test_purge_expired_across_entries() {
    let (ledger, _) = setup(LedgerConfig::default());
    add(&ledger, "bb1", BloodType::OPos, 5, 1).await;
    add(&ledger, "bb2", BloodType::ONeg, 5, 1).await;
    add(&ledger, "bb2", BloodType::ONeg, 5, 30).await;

    let removed = ledger.purge_expired(t0() + Duration::days(5)).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(
        ledger.available("bb2", BloodType::ONeg, t0() + Duration::days(5)).await.unwrap(),
        5
    );
}

#[tokio::test]
async fn test_unknown_bank_rejected() {
    let (ledger, _) = setup(LedgerConfig::default());
    let err = ledger.reserve("nowhere", BloodType::OPos, 1, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownBank(_)));

    let err = ledger
        .add_batch("nowhere", BloodType::OPos, 1, t0(), t0() + Duration::days(1), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownBank(_)));
}

#[tokio::test]
async fn test_add_batch_validation() {
    let (ledger, _) = setup(LedgerConfig::default());
    let err = ledger
        .add_batch("bb1", BloodType::OPos, 0, t0(), t0() + Duration::days(1), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = ledger
        .add_batch("bb1", BloodType::OPos, 3, t0() - Duration::days(50), t0(), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_lock_timeout_when_entry_held() {
    let (ledger, _) = setup(LedgerConfig {
        lock_timeout_ms: 50,
        ..LedgerConfig::default()
    });
    add(&ledger, "bb1", BloodType::OPos, 5, 10).await;

    let key = StockKey::new("bb1", BloodType::OPos);
    let entry = ledger.entries.read().unwrap().get(&key).cloned().unwrap();
    let _held = entry.lock_owned().await;

    let err = ledger.reserve("bb1", BloodType::OPos, 1, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout { .. }));
    assert!(err.is_retryable());

    // 其他 (血库, 血型) 不受影响
    add(&ledger, "bb1", BloodType::ONeg, 5, 10).await;
    ledger.reserve("bb1", BloodType::ONeg, 1, t0()).await.unwrap();
}

#[tokio::test]
async fn test_commit_all_is_all_or_nothing() {
    let (ledger, repo) = setup(LedgerConfig {
        reservation_ttl_secs: 60,
        ..LedgerConfig::default()
    });
    let a_batch = add(&ledger, "bb1", BloodType::OPos, 5, 10).await;
    add(&ledger, "bb2", BloodType::ONeg, 5, 10).await;

    let a = ledger.reserve("bb1", BloodType::OPos, 3, t0() + Duration::seconds(50)).await.unwrap();
    let b = ledger.reserve("bb2", BloodType::ONeg, 2, t0()).await.unwrap();

    // b 已超时: 整组不提交
    let now = t0() + Duration::seconds(70);
    let err = ledger
        .commit_all(&[a.id.clone(), b.id.clone()], now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ReservationExpired(_)));
    assert!(ledger.reservation(&a.id).await.unwrap().unwrap().is_pending());
    assert_eq!(repo.stored_quantity(&a_batch), Some(5));

    let committed = ledger.commit_all(&[a.id.clone()], now).await.unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(repo.stored_quantity(&a_batch), Some(2));
}

#[tokio::test]
async fn test_concurrent_reservations_never_oversell() {
    let (ledger, _) = setup(LedgerConfig::default());
    add(&ledger, "bb1", BloodType::OPos, 10, 10).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger.reserve("bb1", BloodType::OPos, 3, t0()).await
        }));
    }

    let mut granted = 0;
    for h in handles {
        if let Ok(r) = h.await.unwrap() {
            granted += r.quantity();
        }
    }
    assert_eq!(granted, 9);
    assert_eq!(ledger.available("bb1", BloodType::OPos, t0()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_write_failure_on_commit_keeps_reservation_pending() {
    let (ledger, repo) = setup(LedgerConfig::default());
    add(&ledger, "bb1", BloodType::BPos, 5, 10).await;
    let r = ledger.reserve("bb1", BloodType::BPos, 2, t0()).await.unwrap();

    repo.set_fail_writes(true);
    let err = ledger.commit(&r.id, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::Repository(_)));
    assert!(ledger.reservation(&r.id).await.unwrap().unwrap().is_pending());

    repo.set_fail_writes(false);
    ledger.commit(&r.id, t0()).await.unwrap();
}

#[tokio::test]
async fn test_partial_write_on_multi_batch_commit_changes_nothing() {
    let (ledger, repo) = setup(LedgerConfig::default());
    let early = add(&ledger, "bb1", BloodType::OPos, 4, 3).await;
    let late = add(&ledger, "bb1", BloodType::OPos, 6, 10).await;

    // 占用两个批次: early 全部 + late 3 单位
    let r = ledger.reserve("bb1", BloodType::OPos, 7, t0()).await.unwrap();
    assert_eq!(r.holds.len(), 2);

    repo.fail_writes_after(1);
    let err = ledger.commit(&r.id, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::Repository(_)));

    assert!(ledger.reservation(&r.id).await.unwrap().unwrap().is_pending());
    assert_eq!(repo.stored_quantity(&early), Some(4));
    assert_eq!(repo.stored_quantity(&late), Some(6));

    ledger.release(&r.id, t0()).await.unwrap();
    assert_eq!(ledger.available("bb1", BloodType::OPos, t0()).await.unwrap(), 10);
}

#[tokio::test]
async fn test_partial_write_across_reservations_changes_nothing() {
    let (ledger, repo) = setup(LedgerConfig::default());
    let a_batch = add(&ledger, "bb1", BloodType::OPos, 5, 10).await;
    let b_batch = add(&ledger, "bb2", BloodType::OPos, 5, 10).await;

    let a = ledger.reserve("bb1", BloodType::OPos, 3, t0()).await.unwrap();
    let b = ledger.reserve("bb2", BloodType::OPos, 5, t0()).await.unwrap();

    repo.fail_writes_after(1);
    let err = ledger
        .commit_all(&[a.id.clone(), b.id.clone()], t0())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Repository(_)));

    for id in [&a.id, &b.id] {
        assert!(ledger.reservation(id).await.unwrap().unwrap().is_pending());
    }
    assert_eq!(repo.stored_quantity(&a_batch), Some(5));
    assert_eq!(repo.stored_quantity(&b_batch), Some(5));

    // 回滚后两家血库的库存完整恢复
    assert_eq!(ledger.release_all(&[a.id, b.id], t0()).await, 2);
    assert_eq!(ledger.available("bb1", BloodType::OPos, t0()).await.unwrap(), 5);
    assert_eq!(ledger.available("bb2", BloodType::OPos, t0()).await.unwrap(), 5);
}

#[tokio::test]
async fn test_finished_reservations_pruned_on_access() {
    let (ledger, _) = setup(LedgerConfig {
        reservation_ttl_secs: 60,
        ..LedgerConfig::default()
    });
    add(&ledger, "bb1", BloodType::ANeg, 6, 10).await;

    let committed = ledger.reserve("bb1", BloodType::ANeg, 2, t0()).await.unwrap();
    ledger.commit(&committed.id, t0()).await.unwrap();
    let released = ledger.reserve("bb1", BloodType::ANeg, 1, t0()).await.unwrap();
    ledger.release(&released.id, t0()).await.unwrap();
    let pending = ledger
        .reserve("bb1", BloodType::ANeg, 1, t0() + Duration::seconds(150))
        .await
        .unwrap();

    // 未调用后台清理, 普通访问也会移除已结束的旧记录
    let later = t0() + Duration::seconds(200);
    assert_eq!(ledger.available("bb1", BloodType::ANeg, later).await.unwrap(), 3);
    assert!(ledger.reservation(&committed.id).await.unwrap().is_none());
    assert!(ledger.reservation(&released.id).await.unwrap().is_none());
    assert!(ledger.reservation(&pending.id).await.unwrap().unwrap().is_pending());
}

#[tokio::test]
async fn test_load_from_repository_skips_expired() {
    let repo = Arc::new(InMemoryInventoryRepository::new());
    let seed = InventoryLedger::new(repo.clone(), LedgerConfig::default(), StockThresholds::default());
    seed.register_bank(BloodBank::new("bb1", "City General", GeoPoint::new(40.7580, -73.9855)))
        .unwrap();
    add(&seed, "bb1", BloodType::APos, 6, 1).await;
    add(&seed, "bb1", BloodType::APos, 4, 30).await;
    assert_eq!(repo.list_batches().await.unwrap().len(), 2);

    let ledger = InventoryLedger::new(repo, LedgerConfig::default(), StockThresholds::default());
    ledger
        .register_bank(BloodBank::new("bb1", "City General", GeoPoint::new(40.7580, -73.9855)))
        .unwrap();
    let later = t0() + Duration::days(3);
    assert_eq!(ledger.load_from_repository(later).await.unwrap(), 1);
    assert_eq!(ledger.available("bb1", BloodType::APos, later).await.unwrap(), 4);
}

#[tokio::test]
async fn test_snapshot_and_critical_event() {
    let recorder = Arc::new(RecordingEventPublisher::new());
    let repo = Arc::new(InMemoryInventoryRepository::new());
    let ledger = InventoryLedger::new(repo, LedgerConfig::default(), StockThresholds::default())
        .with_publisher(OptionalEventPublisher::with_publisher(recorder.clone()));
    ledger
        .register_bank(BloodBank::new("bb1", "City General", GeoPoint::new(40.7580, -73.9855)))
        .unwrap();
    add(&ledger, "bb1", BloodType::OPos, 12, 10).await;
    add(&ledger, "bb1", BloodType::APos, 60, 10).await;

    let r = ledger.reserve("bb1", BloodType::OPos, 5, t0()).await.unwrap();
    ledger.commit(&r.id, t0()).await.unwrap();
    assert_eq!(recorder.count_of(MatchingEventType::BatchReceived), 2);
    assert_eq!(recorder.count_of(MatchingEventType::StockCritical), 1);

    ledger.reserve("bb1", BloodType::APos, 10, t0()).await.unwrap();
    let snapshot = ledger.snapshot("bb1", t0()).await.unwrap();
    assert_eq!(snapshot.items.len(), 8);
    assert_eq!(snapshot.total_available, 57);

    let o_pos = snapshot.item(BloodType::OPos).unwrap();
    assert_eq!(o_pos.available, 7);
    assert_eq!(o_pos.stock_level, StockLevel::Critical);

    let a_pos = snapshot.item(BloodType::APos).unwrap();
    assert_eq!(a_pos.available, 50);
    assert_eq!(a_pos.reserved, 10);
    assert_eq!(a_pos.stock_level, StockLevel::Excellent);

    assert!(snapshot.critical_types.contains(&BloodType::ONeg));
    assert!(!snapshot.critical_types.contains(&BloodType::APos));
}
