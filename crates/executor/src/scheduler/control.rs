use tracing::debug;

use crate::log::LogLevel;
use crate::task::TaskId;

use super::state::{Effects, Origin};
use super::Scheduler;

impl Scheduler {
    /// Cancel a queued or running task.
    ///
    /// Runs the task's cancel hook and fires its cancellation token before
    /// returning. A body that is already running is not aborted; its eventual
    /// settlement is ignored. A cancelled immediate body keeps the reserved
    /// slot until it settles. Returns `false` for unknown or terminal ids.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        self.cancel_with_reason(id, "cancelled by request")
    }

    pub(crate) fn cancel_with_reason(&self, id: TaskId, reason: &str) -> bool {
        let mut effects = Effects::default();
        {
            let mut inner = self.shared.lock();
            let Some(removed) = inner.remove_tracked(id) else {
                debug!(task_id = %id, "cancel requested for untracked task");
                return false;
            };
            if removed.origin == Origin::ReservedSlot {
                // The slot stays busy until the body settles.
                inner.reserved_retiring = Some(id);
            }
            inner.retire_cancelled(removed, reason, &mut effects);
            inner.drain(self.shared.max_workers, &mut effects);
        }
        effects.run(&self.shared);
        true
    }

    /// Stop accepting work and cancel everything tracked.
    ///
    /// Every queued, running and waiting task has its cancel hook run and is
    /// counted as cancelled; the reserved slot is freed even if a cancelled
    /// body still holds it. Bodies already
    /// running keep going until they observe their token.
    pub fn disconnect(&self) {
        let mut effects = Effects::default();
        {
            let mut inner = self.shared.lock();
            inner.accepting = false;
            let removed = inner.take_all();
            let count = removed.len();
            for task in removed {
                inner.retire_cancelled(task, "executor disconnected", &mut effects);
            }
            inner.log.record(
                LogLevel::Warn,
                None,
                format!("executor disconnected; {} tracked task(s) cancelled", count),
            );
        }
        effects.run(&self.shared);
    }

    /// Accept work again and resume draining.
    pub fn reconnect(&self) {
        let mut effects = Effects::default();
        {
            let mut inner = self.shared.lock();
            inner.accepting = true;
            inner.log.record(LogLevel::Info, None, "executor reconnected");
            inner.promote_reserved(&mut effects);
            inner.drain(self.shared.max_workers, &mut effects);
        }
        effects.run(&self.shared);
    }
}
