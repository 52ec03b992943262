//! Background auto-scan coordination.
//!
//! The coordinator owns at most one outstanding system-initiated scan. A
//! manually submitted queued scan cancels it through the scheduler's
//! [`PreemptionPolicy`] hook; other kinds never interact with it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;
use crate::log::LogLevel;
use crate::scheduler::{PreemptionPolicy, Scheduler};
use crate::task::{Task, TaskId, TaskKind, SYSTEM_SUBMITTER};

#[derive(Debug, Default)]
struct AutoScanState {
    /// Outstanding auto-scan, if any.
    current: Option<TaskId>,
    /// Whether `current` has been handed to the scheduler.
    admitted: bool,
    /// Why `current` is about to be cancelled; consumed by its cancel hook.
    interrupt_reason: Option<String>,
    /// Auto-scan preempted before the scheduler admitted it, with the reason.
    /// `launch` cancels it once its own submission returns.
    preempted_early: Option<(TaskId, String)>,
}

impl AutoScanState {
    /// Take the interruption reason recorded for `id`, clearing `current`.
    fn take_interruption(&mut self, id: TaskId) -> Option<String> {
        if self.current == Some(id) {
            self.current = None;
            self.admitted = false;
            return self.interrupt_reason.take();
        }
        if self.preempted_early.as_ref().is_some_and(|(early, _)| *early == id) {
            return self.preempted_early.take().map(|(_, reason)| reason);
        }
        None
    }
}

fn lock(state: &Mutex<AutoScanState>) -> MutexGuard<'_, AutoScanState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the coordinator state when the auto-scan body finishes or unwinds.
struct ClearOnDrop {
    state: Arc<Mutex<AutoScanState>>,
    id: TaskId,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if state.current == Some(self.id) {
            state.current = None;
            state.admitted = false;
            state.interrupt_reason = None;
        }
        if state.preempted_early.as_ref().is_some_and(|(early, _)| *early == self.id) {
            state.preempted_early = None;
        }
    }
}

#[derive(Debug, Default)]
pub struct AutoScanCoordinator {
    state: Arc<Mutex<AutoScanState>>,
}

impl AutoScanCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an auto-scan cycle is outstanding.
    pub fn is_running(&self) -> bool {
        lock(&self.state).current.is_some()
    }

    /// Id of the outstanding auto-scan, if any.
    pub fn current(&self) -> Option<TaskId> {
        lock(&self.state).current
    }

    /// Launch a new auto-scan unless one is already outstanding.
    ///
    /// Returns `Ok(None)` without calling `factory` when a cycle is in flight.
    /// The built task is submitted as a queued (non-immediate) task with the
    /// `system` submitter. `factory` runs under the coordinator's lock and
    /// must not call back into the coordinator.
    pub fn launch<F>(&self, scheduler: &Scheduler, factory: F) -> Result<Option<TaskId>, ExecutorError>
    where
        F: FnOnce() -> Task,
    {
        match self.reserve(scheduler, factory) {
            Some(task) => self.admit(scheduler, task).map(Some),
            None => Ok(None),
        }
    }

    /// Claim the coordinator for a new cycle and build its wrapped task.
    fn reserve<F>(&self, scheduler: &Scheduler, factory: F) -> Option<Task>
    where
        F: FnOnce() -> Task,
    {
        let task = {
            let mut state = lock(&self.state);
            if let Some(current) = state.current {
                debug!(task_id = %current, "auto-scan already running; launch skipped");
                return None;
            }
            let task = factory();
            state.current = Some(task.id());
            state.admitted = false;
            state.interrupt_reason = None;
            task
        };

        if task.kind() != TaskKind::Scan {
            warn!(task_id = %task.id(), kind = %task.kind(), "auto-scan factory built a non-scan task");
        }
        Some(self.wrap(task.with_immediate(false).with_submitter(SYSTEM_SUBMITTER), scheduler))
    }

    /// Submit a reserved cycle. A manual scan may have preempted it while the
    /// submission was in flight; it is then cancelled right after admission.
    fn admit(&self, scheduler: &Scheduler, task: Task) -> Result<TaskId, ExecutorError> {
        let id = task.id();
        if let Err(e) = scheduler.submit(task) {
            let mut state = lock(&self.state);
            if state.current == Some(id) {
                state.current = None;
                state.admitted = false;
            }
            if state.preempted_early.as_ref().is_some_and(|(early, _)| *early == id) {
                state.preempted_early = None;
            }
            return Err(e);
        }

        let early_reason = {
            let mut state = lock(&self.state);
            if state.current == Some(id) {
                state.admitted = true;
                None
            } else {
                state
                    .preempted_early
                    .as_ref()
                    .filter(|(early, _)| *early == id)
                    .map(|(_, reason)| reason.clone())
            }
        };

        match early_reason {
            Some(reason) => {
                if !scheduler.cancel_with_reason(id, &reason) {
                    // Settled before we got here; its hook never ran.
                    let mut state = lock(&self.state);
                    if state.preempted_early.as_ref().is_some_and(|(early, _)| *early == id) {
                        state.preempted_early = None;
                    }
                }
            }
            None => info!(task_id = %id, "auto-scan launched"),
        }
        Ok(id)
    }

    /// Pick the outstanding auto-scan as the victim of an incoming queued scan.
    ///
    /// An auto-scan whose submission has not returned yet is released from
    /// the coordinator instead and cancelled by its own `launch`.
    pub fn interrupt_if_manual_scan(&self, incoming: &Task) -> Option<TaskId> {
        let mut state = lock(&self.state);
        let current = match state.current {
            Some(current) if current != incoming.id() => current,
            _ => return None,
        };
        let reason = format!(
            "preempted by manual scan {} from {}",
            incoming.id(),
            incoming.submitter().unwrap_or("unknown")
        );
        if state.admitted {
            state.interrupt_reason = Some(reason);
            Some(current)
        } else {
            debug!(task_id = %current, "auto-scan preempted before admission");
            state.current = None;
            state.preempted_early = Some((current, reason));
            None
        }
    }

    /// Forget a pending interruption whose victim turned out to be untracked.
    fn interruption_missed(&self, victim: TaskId) {
        let mut state = lock(&self.state);
        if state.current == Some(victim) {
            state.interrupt_reason = None;
        }
    }

    fn wrap(&self, task: Task, scheduler: &Scheduler) -> Task {
        let id = task.id();

        let state = Arc::clone(&self.state);
        let log = scheduler.downgrade();
        let task = task.wrap_on_cancel(move |inner| {
            Box::new(move || {
                let reason = lock(&state)
                    .take_interruption(id)
                    .unwrap_or_else(|| "cancelled".to_string());

                info!(task_id = %id, reason = %reason, "auto-scan interrupted");
                if let Some(scheduler) = log.upgrade() {
                    scheduler.record_event(
                        LogLevel::Warn,
                        Some(TaskKind::Scan),
                        format!("auto-scan {} interrupted: {}", id, reason),
                    );
                }
                if let Some(hook) = inner {
                    hook();
                }
            })
        });

        let state = Arc::clone(&self.state);
        task.wrap_body(move |body| {
            Box::new(move |token| {
                let guard = ClearOnDrop { state, id };
                async move {
                    let _guard = guard;
                    body(token).await
                }
                .boxed()
            })
        })
    }
}

impl PreemptionPolicy for AutoScanCoordinator {
    fn preempt_for(&self, incoming: &Task) -> Option<TaskId> {
        self.interrupt_if_manual_scan(incoming)
    }

    fn preemption_missed(&self, victim: TaskId) {
        self.interruption_missed(victim);
    }
}
