//! Dynapool worker pools
//!
//! This crate provides runtime-resizable worker pools with:
//! - ResizableBoundedQueue: FIFO work queue whose capacity can change in use
//! - RejectionLedger: Process-wide overflow counters keyed by pool identity
//! - RejectionTracker: Counts overflow events before delegating to a policy
//! - WorkerPoolController: Named pool with ordered core/max/queue resizing
//! - PoolRegistry: The pools of one application plus remote update handling
//! - Registry: Outbound destination for pool snapshots
//! - ReportScheduler: Periodic reporting and update command relay

pub mod error;
pub mod queue;
pub mod ledger;
pub mod rejection;
pub mod controller;
pub mod pool_registry;
pub mod registry;
pub mod report;
pub mod pool_metrics;

pub use error::PoolError;
pub use queue::{EnqueueError, ResizableBoundedQueue, QUEUE_TYPE};
pub use ledger::RejectionLedger;
pub use rejection::{OverflowAction, OverflowHandler, OverflowPolicy, RejectionTracker};
pub use controller::{ResizeRequest, Task, WorkerPoolController};
pub use pool_registry::PoolRegistry;
pub use registry::{InMemoryRegistry, LoggingRegistry, Registry};
pub use report::{
    ReportCycleResult, ReportScheduler, ReportSchedulerConfig, spawn_report_task,
    spawn_update_listener,
};

pub type Result<T> = std::result::Result<T, PoolError>;
