use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use crate::log::LogLevel;
use crate::task::{TaskError, TaskId, TaskResult};

use super::core::Shared;
use super::state::{Effects, Lane, Launch, Running};

impl Effects {
    /// Run deferred side effects. Must be called without holding the lock.
    pub(super) fn run(self, shared: &Arc<Shared>) {
        for token in self.tokens {
            token.cancel();
        }
        for (id, hook) in self.cancel_hooks {
            run_hook(shared, id, "cancel", hook);
        }
        for (id, hook, err) in self.error_hooks {
            run_hook(shared, id, "error", move || hook(&err));
        }
        for launch in self.launches {
            spawn_body(Arc::clone(shared), launch);
        }
    }
}

fn run_hook(shared: &Shared, id: TaskId, which: &str, hook: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(hook)) {
        shared.record_event(
            LogLevel::Error,
            None,
            format!("{} hook of task {} panicked: {}", which, id, panic_message(&*panic)),
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a body to settlement on the Tokio runtime, then report back.
fn spawn_body(shared: Arc<Shared>, launch: Launch) {
    let Launch {
        id,
        lane,
        body,
        token,
    } = launch;
    tokio::spawn(async move {
        let outcome = match AssertUnwindSafe(async move { body(token).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(TaskError::Panicked(panic_message(&*panic))),
        };
        shared.settle(lane, id, outcome);
    });
}

impl Shared {
    /// Record a body's outcome and refill the lane it ran on.
    ///
    /// Settlements of tasks that are no longer tracked (cancelled or swept by
    /// a disconnect) are discarded, apart from handing a reserved slot held by
    /// a cancelled body to the next waiter.
    fn settle(self: &Arc<Self>, lane: Lane, id: TaskId, outcome: TaskResult) {
        let mut effects = Effects::default();
        {
            let mut inner = self.lock();
            let running = match lane {
                Lane::Worker => inner.active.remove(&id),
                Lane::Reserved => {
                    if inner.reserved.as_ref().is_some_and(|r| r.meta.id == id) {
                        inner.reserved.take()
                    } else {
                        if inner.reserved_retiring == Some(id) {
                            inner.reserved_retiring = None;
                            inner.log.record(
                                LogLevel::Debug,
                                None,
                                format!("cancelled task {} released the reserved slot", id),
                            );
                            inner.promote_reserved(&mut effects);
                        }
                        None
                    }
                }
            };
            let Some(Running {
                meta,
                on_cancel,
                on_error,
                started,
                ..
            }) = running
            else {
                debug!(task_id = %id, "ignoring settlement of untracked task");
                drop(inner);
                effects.run(self);
                return;
            };

            let kind = meta.kind;
            let elapsed = started.elapsed();
            match outcome {
                Ok(()) => {
                    inner.metrics.record_completed(kind, elapsed);
                    inner.log.record(
                        LogLevel::Info,
                        Some(kind),
                        format!("task {} completed in {:.2?}", id, elapsed),
                    );
                }
                Err(TaskError::Cancelled) => {
                    inner.metrics.record_cancelled(kind);
                    inner.log.record(
                        LogLevel::Warn,
                        Some(kind),
                        format!("task {} stopped itself after {:.2?}", id, elapsed),
                    );
                    if let Some(hook) = on_cancel {
                        effects.cancel_hooks.push((id, hook));
                    }
                }
                Err(err) => {
                    inner.metrics.record_failed(kind, elapsed);
                    match on_error {
                        Some(hook) => {
                            inner.log.record(
                                LogLevel::Warn,
                                Some(kind),
                                format!(
                                    "task {} failed after {:.2?}; passed to its error hook",
                                    id, elapsed
                                ),
                            );
                            effects.error_hooks.push((id, hook, err));
                        }
                        None => {
                            inner.log.record(
                                LogLevel::Error,
                                Some(kind),
                                format!("task {} failed after {:.2?}: {}", id, elapsed, err),
                            );
                        }
                    }
                }
            }

            if lane == Lane::Reserved {
                inner.promote_reserved(&mut effects);
            }
            inner.drain(self.max_workers, &mut effects);
        }
        effects.run(self);
    }
}
