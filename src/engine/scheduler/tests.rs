use super::core::RequestScheduler;
use super::report::FailureStage;
use crate::config::engine_config::{LedgerConfig, PlannerConfig, SchedulerConfig, StockThresholds};
use crate::domain::blood_bank::{BloodBank, GeoPoint};
use crate::domain::request::BloodRequest;
use crate::domain::types::{BloodType, RequestStatus, Urgency};
use crate::engine::error::EngineError;
use crate::engine::events::{MatchingEventType, OptionalEventPublisher, RecordingEventPublisher};
use crate::engine::ledger::InventoryLedger;
use crate::engine::planner::AllocationPlanner;
use crate::repository::memory_repo::{InMemoryBloodRequestRepository, InMemoryInventoryRepository};
use crate::repository::BloodRequestRepository;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

struct Fixture {
    scheduler: Arc<RequestScheduler>,
    ledger: Arc<InventoryLedger>,
    requests: Arc<InMemoryBloodRequestRepository>,
    events: Arc<RecordingEventPublisher>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
}

fn fixture(planner_config: PlannerConfig, config: SchedulerConfig) -> Fixture {
    let ledger = InventoryLedger::new(
        Arc::new(InMemoryInventoryRepository::new()),
        LedgerConfig::default(),
        StockThresholds::default(),
    );
    ledger
        .register_bank(BloodBank::new("bb1", "City General", GeoPoint::new(40.7580, -73.9855)))
        .unwrap();
    let ledger = Arc::new(ledger);
    let planner = Arc::new(AllocationPlanner::new(ledger.clone(), planner_config));
    let requests = Arc::new(InMemoryBloodRequestRepository::new());
    let events = Arc::new(RecordingEventPublisher::new());
    let scheduler = RequestScheduler::new(planner, requests.clone(), config)
        .with_publisher(OptionalEventPublisher::with_publisher(events.clone()));
    Fixture {
        scheduler: Arc::new(scheduler),
        ledger,
        requests,
        events,
    }
}

async fn stock(ledger: &InventoryLedger, t: BloodType, qty: u32, now: DateTime<Utc>) {
    ledger
        .add_batch("bb1", t, qty, now - Duration::days(1), now + Duration::days(30), now)
        .await
        .unwrap();
}

fn request(t: BloodType, units: u32, urgency: Urgency, requested_at: DateTime<Utc>) -> BloodRequest {
    BloodRequest::new(
        "recipient-1",
        t,
        units,
        urgency,
        GeoPoint::new(40.7128, -74.0060),
        requested_at,
        requested_at + Duration::days(3),
    )
}

#[tokio::test]
async fn test_critical_dispatched_before_earlier_high() {
    let f = fixture(PlannerConfig::default(), SchedulerConfig::default());
    stock(&f.ledger, BloodType::APos, 3, t0()).await;

    let high = f
        .scheduler
        .submit(request(BloodType::APos, 3, Urgency::High, t0() + Duration::minutes(1)))
        .await
        .unwrap();
    let critical = f
        .scheduler
        .submit(request(BloodType::APos, 3, Urgency::Critical, t0() + Duration::minutes(5)))
        .await
        .unwrap();

    let report = f.scheduler.run_cycle(t0() + Duration::minutes(10)).await.unwrap();
    assert_eq!(report.fulfilled, vec![critical.id.clone()]);
    assert_eq!(report.deferred, vec![high.id.clone()]);

    let stored = f.requests.find_request(&critical.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Fulfilled);
    assert_eq!(stored.units_fulfilled, 3);

    let pending = f.scheduler.get(&high.id).await.unwrap().unwrap();
    assert!(pending.is_active());
    assert_eq!(pending.attempts, 1);
    assert_eq!(f.events.count_of(MatchingEventType::RequestFulfilled), 1);
}

#[tokio::test]
async fn test_overdue_requests_expire_before_planning() {
    let f = fixture(PlannerConfig::default(), SchedulerConfig::default());
    stock(&f.ledger, BloodType::OPos, 10, t0()).await;

    let r = f
        .scheduler
        .submit(request(BloodType::OPos, 2, Urgency::Low, t0()))
        .await
        .unwrap();

    let later = t0() + Duration::days(4);
    let report = f.scheduler.run_cycle(later).await.unwrap();
    assert_eq!(report.expired, vec![r.id.clone()]);
    assert!(report.fulfilled.is_empty());
    assert_eq!(f.ledger.available("bb1", BloodType::OPos, later).await.unwrap(), 10);

    let stored = f.requests.find_request(&r.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Expired);
    assert_eq!(f.events.count_of(MatchingEventType::RequestExpired), 1);
    assert_eq!(f.scheduler.queue_stats().unwrap().active, 0);
}

#[tokio::test]
async fn test_stalled_after_max_attempts_and_requeue() {
    let f = fixture(
        PlannerConfig::default(),
        SchedulerConfig {
            max_attempts: 2,
            ..SchedulerConfig::default()
        },
    );
    let r = f
        .scheduler
        .submit(request(BloodType::BNeg, 2, Urgency::Medium, t0()))
        .await
        .unwrap();

    let first = f.scheduler.run_cycle(t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(first.deferred, vec![r.id.clone()]);
    assert!(first.stalled.is_empty());

    let second = f.scheduler.run_cycle(t0() + Duration::minutes(2)).await.unwrap();
    assert_eq!(second.stalled, vec![r.id.clone()]);

    // 挂起后不再分派, 但仍为 active
    let third = f.scheduler.run_cycle(t0() + Duration::minutes(3)).await.unwrap();
    assert_eq!(third.dispatched(), 0);
    let stalled = f.scheduler.stalled_requests().unwrap();
    assert_eq!(stalled.len(), 1);
    assert!(stalled[0].is_active());
    assert_eq!(f.events.count_of(MatchingEventType::RequestStalled), 1);

    stock(&f.ledger, BloodType::ONeg, 2, t0()).await;
    assert_eq!(f.scheduler.requeue_stalled().await.unwrap(), 1);
    let stats = f.scheduler.queue_stats().unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.stalled, 0);

    let fourth = f.scheduler.run_cycle(t0() + Duration::minutes(4)).await.unwrap();
    assert_eq!(fourth.fulfilled, vec![r.id.clone()]);
    assert!(fourth.plans[0].uses_cross_type(BloodType::BNeg));
}

#[tokio::test]
async fn test_partial_fulfilment_stays_active_and_requeued() {
    let f = fixture(
        PlannerConfig {
            allow_partial: true,
            max_distance_km: None,
        },
        SchedulerConfig::default(),
    );
    stock(&f.ledger, BloodType::AbNeg, 2, t0()).await;
    let r = f
        .scheduler
        .submit(request(BloodType::AbNeg, 5, Urgency::High, t0()))
        .await
        .unwrap();

    let first = f.scheduler.run_cycle(t0() + Duration::minutes(1)).await.unwrap();
    assert_eq!(first.partial, vec![r.id.clone()]);
    assert_eq!(first.plans[0].shortfall, 3);

    let tracked = f.scheduler.get(&r.id).await.unwrap().unwrap();
    assert!(tracked.is_active());
    assert_eq!(tracked.units_fulfilled, 2);
    assert_eq!(tracked.outstanding_units(), 3);
    assert_eq!(f.scheduler.queue_stats().unwrap().queued, 1);

    stock(&f.ledger, BloodType::ANeg, 3, t0()).await;
    let second = f.scheduler.run_cycle(t0() + Duration::minutes(2)).await.unwrap();
    assert_eq!(second.fulfilled, vec![r.id.clone()]);
    let stored = f.requests.find_request(&r.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Fulfilled);
    assert_eq!(stored.units_fulfilled, 5);
}

#[tokio::test]
async fn test_storage_failure_reported_loop_continues() {
    let f = fixture(PlannerConfig::default(), SchedulerConfig::default());
    stock(&f.ledger, BloodType::OPos, 6, t0()).await;

    let a = f
        .scheduler
        .submit(request(BloodType::OPos, 2, Urgency::Critical, t0()))
        .await
        .unwrap();
    let b = f
        .scheduler
        .submit(request(BloodType::OPos, 2, Urgency::Low, t0()))
        .await
        .unwrap();

    f.requests.set_fail_writes(true);
    let report = f.scheduler.run_cycle(t0() + Duration::minutes(1)).await.unwrap();

    assert_eq!(report.fulfilled, vec![a.id.clone(), b.id.clone()]);
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|fail| fail.stage == FailureStage::Persistence));
    assert_eq!(f.ledger.available("bb1", BloodType::OPos, t0()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_cancel_lifecycle() {
    let f = fixture(PlannerConfig::default(), SchedulerConfig::default());
    stock(&f.ledger, BloodType::APos, 5, t0()).await;
    let r = f
        .scheduler
        .submit(request(BloodType::APos, 1, Urgency::High, t0()))
        .await
        .unwrap();

    let cancelled = f.scheduler.cancel(&r.id, t0()).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    let report = f.scheduler.run_cycle(t0() + Duration::minutes(1)).await.unwrap();
    assert!(report.is_idle());
    assert_eq!(f.ledger.available("bb1", BloodType::APos, t0()).await.unwrap(), 5);

    let err = f.scheduler.cancel(&r.id, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    let err = f.scheduler.cancel("missing", t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::RequestNotFound(_)));
    assert_eq!(f.events.count_of(MatchingEventType::RequestCancelled), 1);
}

#[tokio::test]
async fn test_submit_validation() {
    let f = fixture(PlannerConfig::default(), SchedulerConfig::default());

    let zero = request(BloodType::OPos, 0, Urgency::Low, t0());
    assert!(matches!(
        f.scheduler.submit(zero).await.unwrap_err(),
        EngineError::Validation(_)
    ));

    let mut backwards = request(BloodType::OPos, 1, Urgency::Low, t0());
    backwards.required_by = t0() - Duration::hours(1);
    assert!(matches!(
        f.scheduler.submit(backwards).await.unwrap_err(),
        EngineError::Validation(_)
    ));

    let ok = f
        .scheduler
        .submit(request(BloodType::OPos, 1, Urgency::Low, t0()))
        .await
        .unwrap();
    assert!(matches!(
        f.scheduler.submit(ok).await.unwrap_err(),
        EngineError::Validation(_)
    ));
}

#[tokio::test]
async fn test_restore_from_repository() {
    let f = fixture(
        PlannerConfig::default(),
        SchedulerConfig {
            max_attempts: 3,
            ..SchedulerConfig::default()
        },
    );
    let fresh = request(BloodType::OPos, 1, Urgency::Medium, t0());
    let mut exhausted = request(BloodType::OPos, 1, Urgency::Medium, t0());
    exhausted.attempts = 3;
    let mut done = request(BloodType::OPos, 1, Urgency::Medium, t0());
    done.status = RequestStatus::Fulfilled;
    for r in [&fresh, &exhausted, &done] {
        f.requests.upsert_request(r).await.unwrap();
    }

    assert_eq!(f.scheduler.restore_from_repository().await.unwrap(), 2);
    let stats = f.scheduler.queue_stats().unwrap();
    assert_eq!(stats.active, 2);
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.stalled, 1);
    assert_eq!(stats.queued_by_urgency.get(&Urgency::Medium), Some(&1));

    // 重复恢复不会重复入队
    assert_eq!(f.scheduler.restore_from_repository().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_dispatch_fulfils_all() {
    let f = fixture(
        PlannerConfig::default(),
        SchedulerConfig {
            dispatch_concurrency: 4,
            ..SchedulerConfig::default()
        },
    );
    stock(&f.ledger, BloodType::OPos, 20, t0()).await;

    let mut ids = Vec::new();
    for i in 0..8 {
        let r = f
            .scheduler
            .submit(request(BloodType::OPos, 2, Urgency::Medium, t0() + Duration::minutes(i)))
            .await
            .unwrap();
        ids.push(r.id);
    }

    let report = f.scheduler.run_cycle(t0() + Duration::hours(1)).await.unwrap();
    // 结果按优先顺序汇总
    assert_eq!(report.fulfilled, ids);
    assert_eq!(f.ledger.available("bb1", BloodType::OPos, t0()).await.unwrap(), 4);
}

#[tokio::test]
async fn test_background_loop_and_shutdown() {
    let f = fixture(
        PlannerConfig::default(),
        SchedulerConfig {
            cycle_interval_secs: 1,
            ..SchedulerConfig::default()
        },
    );
    let now = Utc::now();
    stock(&f.ledger, BloodType::BPos, 2, now).await;
    let r = f
        .scheduler
        .submit(request(BloodType::BPos, 2, Urgency::High, now))
        .await
        .unwrap();

    let handle = f.scheduler.spawn();
    let mut fulfilled = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let current = f.scheduler.get(&r.id).await.unwrap().unwrap();
        if current.status == RequestStatus::Fulfilled {
            fulfilled = true;
            break;
        }
    }
    assert!(fulfilled);
    handle.shutdown().await.unwrap();
}
