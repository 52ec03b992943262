//! Process-wide execution manager: the scheduler plus the auto-scan coordinator.

use std::sync::Arc;
use std::time::Duration;

use netwatch_core::{Config, ExecutorConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::autoscan::AutoScanCoordinator;
use crate::error::ExecutorError;
use crate::log::{LogEntry, LogLevel};
use crate::metrics::ExecutionMetrics;
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskId, TaskKind};
use crate::types::{TaskListing, TaskSnapshot};

const MIN_AUTO_SCAN_INTERVAL: Duration = Duration::from_millis(1);

/// Single chokepoint for every asynchronous unit of work.
///
/// Cheap to clone; all clones share one scheduler.
#[derive(Debug, Clone)]
pub struct ExecutionManager {
    scheduler: Scheduler,
    auto_scan: Arc<AutoScanCoordinator>,
}

impl ExecutionManager {
    /// Build a manager whose scheduler consults the auto-scan coordinator.
    pub fn new(config: &ExecutorConfig) -> Self {
        let auto_scan = Arc::new(AutoScanCoordinator::new());
        let scheduler = Scheduler::with_policy(config, auto_scan.clone());
        Self {
            scheduler,
            auto_scan,
        }
    }

    /// Validate `config` and build a manager from its executor section.
    pub fn from_config(config: &Config) -> Result<Self, ExecutorError> {
        config.validate()?;
        Ok(Self::new(&config.executor))
    }

    /// The underlying scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Admit a task; see [`Scheduler::submit`].
    pub fn submit(&self, task: Task) -> Result<TaskId, ExecutorError> {
        self.scheduler.submit(task)
    }

    /// Cancel a queued or running task. `false` for unknown or terminal ids.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.scheduler.cancel_task(id)
    }

    /// Snapshot of running, queued and reserved-slot tasks.
    pub fn list_tasks(&self) -> TaskListing {
        self.scheduler.list_tasks()
    }

    /// Look up a tracked task.
    pub fn get_task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.scheduler.get_task(id)
    }

    /// Activity log lines, oldest first.
    pub fn logs(&self) -> Vec<String> {
        self.scheduler.logs()
    }

    /// Structured activity log entries, oldest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.scheduler.log_entries()
    }

    /// Snapshot of the execution counters.
    pub fn metrics(&self) -> ExecutionMetrics {
        self.scheduler.metrics()
    }

    /// Stop accepting work and cancel everything tracked.
    pub fn disconnect(&self) {
        self.scheduler.disconnect();
    }

    /// Accept work again and resume draining.
    pub fn reconnect(&self) {
        self.scheduler.reconnect();
    }

    /// Whether submissions are currently admitted.
    pub fn is_accepting(&self) -> bool {
        self.scheduler.is_accepting()
    }

    /// Launch a background scan unless one is outstanding.
    pub fn launch_auto_scan<F>(&self, factory: F) -> Result<Option<TaskId>, ExecutorError>
    where
        F: FnOnce() -> Task,
    {
        self.auto_scan.launch(&self.scheduler, factory)
    }

    /// Whether an auto-scan cycle is outstanding.
    pub fn auto_scan_running(&self) -> bool {
        self.auto_scan.is_running()
    }

    /// Id of the outstanding auto-scan, if any.
    pub fn current_auto_scan(&self) -> Option<TaskId> {
        self.auto_scan.current()
    }

    /// Spawn the recurring auto-scan driver.
    ///
    /// Launches on the first tick and then every `interval`; ticks that find
    /// a cycle still outstanding are skipped. Stops when `shutdown` turns
    /// `true` or its sender is dropped.
    pub fn spawn_auto_scan_loop<F>(
        &self,
        interval: Duration,
        factory: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Task + Send + Sync + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_AUTO_SCAN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval = ?interval, "auto-scan loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.launch_auto_scan(&factory) {
                            Ok(Some(id)) => debug!(task_id = %id, "auto-scan cycle started"),
                            Ok(None) => debug!("auto-scan cycle still outstanding"),
                            Err(e) => {
                                warn!(error = %e, "auto-scan launch rejected");
                                manager.scheduler.record_event(
                                    LogLevel::Warn,
                                    Some(TaskKind::Scan),
                                    format!("auto-scan launch rejected: {}", e),
                                );
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("auto-scan loop stopped");
        })
    }
}
