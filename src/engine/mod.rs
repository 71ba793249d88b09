// ==========================================
// 血液供应匹配引擎 - 引擎层
// ==========================================
// 职责: 库存一致性, 过期感知分配, 按紧急度匹配请求
// 红线: Engine 不拼 SQL, 持久化只经由仓储 trait
// ==========================================

pub mod compatibility;
pub mod donation;
pub mod error;
pub mod events;
pub mod ledger;
pub mod matching;
pub mod planner;
pub mod repositories;
pub mod scheduler;

// 重导出核心引擎
pub use compatibility::{can_donate, compatible_donors, compatible_recipients, parse_and_resolve};
pub use donation::DonationService;
pub use error::{EngineError, EngineResult};
pub use events::{
    MatchingEvent, MatchingEventPublisher, MatchingEventType, NoOpEventPublisher,
    OptionalEventPublisher, RecordingEventPublisher,
};
pub use ledger::{InventoryItem, InventoryLedger, InventorySnapshot, StockKey};
pub use matching::{BackgroundTasks, BootstrapSummary, MatchingEngine};
pub use planner::AllocationPlanner;
pub use repositories::MatchingRepositories;
pub use scheduler::{
    CycleReport, FailureStage, QueueEntry, QueueStats, RequestFailure, RequestQueue,
    RequestScheduler, SchedulerHandle,
};
