use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use netwatch_core::ExecutorConfig;
use tracing::info;

use crate::log::{LogEntry, LogLevel};
use crate::metrics::ExecutionMetrics;
use crate::task::{TaskId, TaskKind};
use crate::types::{TaskListing, TaskSnapshot};

use super::admission::PreemptionPolicy;
use super::state::Inner;

/// State shared between the scheduler handle and its running bodies.
pub(super) struct Shared {
    pub max_workers: usize,
    pub inner: Mutex<Inner>,
    pub policy: Option<Arc<dyn PreemptionPolicy>>,
}

impl Shared {
    /// User code never runs under this lock, so a poisoned guard is still consistent.
    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_event(&self, level: LogLevel, kind: Option<TaskKind>, message: String) {
        self.lock().log.record(level, kind, message);
    }
}

/// The execution scheduler. Admits [`Task`](crate::task::Task)s, runs queued
/// work on a bounded worker pool in priority order, and runs immediate work on
/// a single reserved slot.
///
/// Cloning yields another handle to the same scheduler. Submitting work spawns
/// bodies with `tokio::spawn`, so it must happen inside a Tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler without a preemption policy.
    pub fn new(config: &ExecutorConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a scheduler that consults `policy` before admitting queued scans.
    pub fn with_policy(config: &ExecutorConfig, policy: Arc<dyn PreemptionPolicy>) -> Self {
        Self::build(config, Some(policy))
    }

    fn build(config: &ExecutorConfig, policy: Option<Arc<dyn PreemptionPolicy>>) -> Self {
        let max_workers = config.resolved_max_workers();
        info!(
            max_workers,
            log_capacity = config.log_capacity,
            "Scheduler created"
        );
        Self {
            shared: Arc::new(Shared {
                max_workers,
                inner: Mutex::new(Inner::new(config.log_capacity)),
                policy,
            }),
        }
    }

    /// Resolved worker pool size.
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Whether `submit` currently admits work.
    pub fn is_accepting(&self) -> bool {
        self.shared.lock().accepting
    }

    /// Snapshot of running, queued and reserved-slot tasks.
    pub fn list_tasks(&self) -> TaskListing {
        self.shared.lock().listing()
    }

    /// Look up a tracked task. Terminal and unknown ids yield `None`.
    pub fn get_task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.shared.lock().snapshot(id)
    }

    /// Activity log lines, oldest first.
    pub fn logs(&self) -> Vec<String> {
        self.shared.lock().log.lines()
    }

    /// Structured activity log entries, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.shared.lock().log.entries()
    }

    /// Snapshot of the execution counters.
    pub fn metrics(&self) -> ExecutionMetrics {
        self.shared.lock().metrics.clone()
    }

    /// Append a line to the activity log on behalf of a producer.
    pub fn record_event(&self, level: LogLevel, kind: Option<TaskKind>, message: impl Into<String>) {
        self.shared.record_event(level, kind, message.into());
    }

    pub(crate) fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(Arc::downgrade(&self.shared))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Scheduler")
            .field("max_workers", &self.shared.max_workers)
            .field("accepting", &inner.accepting)
            .field("active", &inner.active.len())
            .field("queued", &inner.queue.len())
            .field("reserved_busy", &inner.reserved_busy())
            .finish()
    }
}

/// Non-owning scheduler handle for hooks stored inside the scheduler itself.
#[derive(Clone)]
pub(crate) struct WeakScheduler(Weak<Shared>);

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.0.upgrade().map(|shared| Scheduler { shared })
    }
}
