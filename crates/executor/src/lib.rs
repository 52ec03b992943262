//! Execution manager for the network inventory dashboard.
//!
//! Every asynchronous unit of work (network scans, topology rebuilds,
//! user-triggered side effects) is admitted, scheduled, executed and
//! observed here. See [`ExecutionManager`] for the entry point.

pub mod autoscan;
pub mod error;
pub mod log;
pub mod manager;
pub mod metrics;
pub mod scheduler;
pub mod task;
pub mod types;

pub use autoscan::AutoScanCoordinator;
pub use error::ExecutorError;
pub use log::{ActivityLog, LogEntry, LogLevel, RingBuffer};
pub use manager::ExecutionManager;
pub use metrics::{ExecutionMetrics, KindMetrics};
pub use scheduler::{PreemptionPolicy, Scheduler};
pub use task::{
    CancelHook, ErrorHook, Task, TaskBody, TaskContext, TaskError, TaskId, TaskKind, TaskResult,
    SYSTEM_SUBMITTER,
};
pub use types::{ReservedSlotState, TaskListing, TaskSnapshot, TaskStatus};

pub use tokio_util::sync::CancellationToken;
