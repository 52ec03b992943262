use tracing::warn;

use crate::error::ExecutorError;
use crate::log::LogLevel;
use crate::task::{Task, TaskId, TaskKind};

use super::state::Effects;
use super::Scheduler;

/// Submission-time hook deciding whether an incoming queued scan displaces
/// tracked work.
///
/// The scheduler consults the policy only for non-immediate `scan` tasks,
/// before the incoming task is recorded. A returned id is cancelled (its
/// cancel hook runs) before admission continues.
pub trait PreemptionPolicy: Send + Sync {
    fn preempt_for(&self, incoming: &Task) -> Option<TaskId>;

    /// Called when the id returned by `preempt_for` was no longer tracked.
    fn preemption_missed(&self, _victim: TaskId) {}
}

impl Scheduler {
    /// Admit a task.
    ///
    /// Immediate tasks go to the reserved slot (or wait for it); everything
    /// else is queued and the queue is drained into free workers. Fails with
    /// [`ExecutorError::Rejected`] after [`disconnect`](Self::disconnect);
    /// a rejected task is dropped without running its body or hooks.
    pub fn submit(&self, task: Task) -> Result<TaskId, ExecutorError> {
        let id = task.id();
        if !self.is_accepting() {
            return Err(reject(&task));
        }

        if task.kind() == TaskKind::Scan && !task.is_immediate() {
            if let Some(policy) = self.shared.policy.as_ref() {
                if let Some(victim) = policy.preempt_for(&task) {
                    if !self.cancel_with_reason(victim, &format!("preempted by scan {}", id)) {
                        policy.preemption_missed(victim);
                    }
                }
            }
        }

        let mut effects = Effects::default();
        {
            let mut inner = self.shared.lock();
            if !inner.accepting {
                drop(inner);
                return Err(reject(&task));
            }

            inner.metrics.record_submitted();
            inner.log.record(
                LogLevel::Info,
                Some(task.kind()),
                format!(
                    "submitted task {} (priority {}, {}, submitter {})",
                    id,
                    task.priority(),
                    if task.is_immediate() { "immediate" } else { "queued" },
                    task.submitter().unwrap_or("-"),
                ),
            );

            if task.is_immediate() {
                inner.admit_immediate(task, &mut effects);
            } else {
                inner.enqueue(task);
                inner.drain(self.shared.max_workers, &mut effects);
            }
        }
        effects.run(&self.shared);
        Ok(id)
    }
}

fn reject(task: &Task) -> ExecutorError {
    warn!(task_id = %task.id(), kind = %task.kind(), "rejecting task: executor disconnected");
    ExecutorError::Rejected(task.id())
}
