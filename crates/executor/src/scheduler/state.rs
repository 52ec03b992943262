use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::log::{ActivityLog, LogLevel};
use crate::metrics::ExecutionMetrics;
use crate::task::{CancelHook, ErrorHook, Task, TaskBody, TaskError, TaskId, TaskMeta};
use crate::types::{ReservedSlotState, TaskListing, TaskSnapshot, TaskStatus};

/// Queue ordering: highest priority first, then admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// Where a running body was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Lane {
    Worker,
    Reserved,
}

/// Where a task was found when it was pulled out of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Origin {
    Queue,
    Worker,
    ReservedSlot,
    ReservedWait,
}

/// A task whose body has been started.
pub(super) struct Running {
    pub meta: TaskMeta,
    pub token: CancellationToken,
    pub on_cancel: Option<CancelHook>,
    pub on_error: Option<ErrorHook>,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
}

/// A body ready to be spawned once the lock is released.
pub(super) struct Launch {
    pub id: TaskId,
    pub lane: Lane,
    pub body: TaskBody,
    pub token: CancellationToken,
}

/// Side effects collected under the lock and run after it is released.
#[derive(Default)]
pub(super) struct Effects {
    pub launches: Vec<Launch>,
    pub tokens: Vec<CancellationToken>,
    pub cancel_hooks: Vec<(TaskId, CancelHook)>,
    pub error_hooks: Vec<(TaskId, ErrorHook, TaskError)>,
}

/// A task removed by cancellation.
pub(super) struct Removed {
    pub meta: TaskMeta,
    pub origin: Origin,
    pub on_cancel: Option<CancelHook>,
    pub token: Option<CancellationToken>,
}

impl Removed {
    fn queued(task: Task, origin: Origin) -> Self {
        Self {
            meta: task.meta,
            origin,
            on_cancel: task.on_cancel,
            token: None,
        }
    }

    fn running(running: Running, origin: Origin) -> Self {
        Self {
            meta: running.meta,
            origin,
            on_cancel: running.on_cancel,
            token: Some(running.token),
        }
    }
}

/// All scheduler bookkeeping. Lives behind the scheduler's single mutex.
pub(super) struct Inner {
    pub queue: BTreeMap<QueueKey, Task>,
    pub active: HashMap<TaskId, Running>,
    /// Tracked occupant of the reserved slot.
    pub reserved: Option<Running>,
    /// Cancelled occupant whose body still holds the reserved slot.
    pub reserved_retiring: Option<TaskId>,
    pub reserved_waiting: VecDeque<Task>,
    pub accepting: bool,
    pub metrics: ExecutionMetrics,
    pub log: ActivityLog,
    next_seq: u64,
}

impl Inner {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            queue: BTreeMap::new(),
            active: HashMap::new(),
            reserved: None,
            reserved_retiring: None,
            reserved_waiting: VecDeque::new(),
            accepting: true,
            metrics: ExecutionMetrics::default(),
            log: ActivityLog::new(log_capacity),
            next_seq: 0,
        }
    }

    pub fn enqueue(&mut self, task: Task) {
        let key = QueueKey {
            priority: Reverse(task.meta.priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.insert(key, task);
    }

    /// Whether an immediate body is running, tracked or not.
    pub fn reserved_busy(&self) -> bool {
        self.reserved.is_some() || self.reserved_retiring.is_some()
    }

    /// Whether `id` is queued, running, or held by the reserved lane.
    pub fn is_tracked(&self, id: TaskId) -> bool {
        self.active.contains_key(&id)
            || self.reserved.as_ref().is_some_and(|r| r.meta.id == id)
            || self.queue.values().any(|t| t.meta.id == id)
            || self.reserved_waiting.iter().any(|t| t.meta.id == id)
    }

    fn dependencies_met(&self, task: &Task) -> bool {
        task.meta.dependencies.iter().all(|dep| !self.is_tracked(*dep))
    }

    /// Move a task into its lane and hand back the body to spawn.
    pub fn start(&mut self, task: Task, lane: Lane) -> Launch {
        let Task {
            meta,
            body,
            on_cancel,
            on_error,
        } = task;
        let id = meta.id;
        let kind = meta.kind;
        let token = CancellationToken::new();
        let running = Running {
            meta,
            token: token.clone(),
            on_cancel,
            on_error,
            started: Instant::now(),
            started_at: Utc::now(),
        };

        match lane {
            Lane::Worker => {
                self.active.insert(id, running);
                self.log.record(
                    LogLevel::Info,
                    Some(kind),
                    format!("task {} started on worker pool ({} active)", id, self.active.len()),
                );
            }
            Lane::Reserved => {
                self.reserved = Some(running);
                self.log.record(
                    LogLevel::Info,
                    Some(kind),
                    format!("task {} started on reserved slot", id),
                );
            }
        }

        Launch {
            id,
            lane,
            body,
            token,
        }
    }

    /// Start the highest-priority eligible queued tasks until the pool is full.
    pub fn drain(&mut self, max_workers: usize, effects: &mut Effects) {
        while self.accepting && self.active.len() < max_workers {
            let next = self
                .queue
                .iter()
                .find(|(_, task)| self.dependencies_met(task))
                .map(|(key, _)| *key);
            let Some(key) = next else { break };
            let Some(task) = self.queue.remove(&key) else { break };
            effects.launches.push(self.start(task, Lane::Worker));
        }
    }

    /// Start an immediate task now, or park it until the reserved slot frees.
    pub fn admit_immediate(&mut self, task: Task, effects: &mut Effects) {
        if !self.reserved_busy() {
            effects.launches.push(self.start(task, Lane::Reserved));
            return;
        }
        let kind = task.meta.kind;
        let id = task.meta.id;
        self.reserved_waiting.push_back(task);
        self.log.record(
            LogLevel::Debug,
            Some(kind),
            format!(
                "task {} waiting for reserved slot ({} waiting)",
                id,
                self.reserved_waiting.len()
            ),
        );
    }

    /// Hand a free reserved slot to the next waiting immediate task.
    pub fn promote_reserved(&mut self, effects: &mut Effects) {
        if self.reserved_busy() || !self.accepting {
            return;
        }
        if let Some(next) = self.reserved_waiting.pop_front() {
            effects.launches.push(self.start(next, Lane::Reserved));
        }
    }

    /// Pull a tracked task out of whichever collection holds it.
    pub fn remove_tracked(&mut self, id: TaskId) -> Option<Removed> {
        if let Some(running) = self.active.remove(&id) {
            return Some(Removed::running(running, Origin::Worker));
        }
        if self.reserved.as_ref().is_some_and(|r| r.meta.id == id) {
            return self
                .reserved
                .take()
                .map(|running| Removed::running(running, Origin::ReservedSlot));
        }
        let key = self
            .queue
            .iter()
            .find(|(_, task)| task.meta.id == id)
            .map(|(key, _)| *key);
        if let Some(task) = key.and_then(|key| self.queue.remove(&key)) {
            return Some(Removed::queued(task, Origin::Queue));
        }
        let pos = self.reserved_waiting.iter().position(|t| t.meta.id == id)?;
        self.reserved_waiting
            .remove(pos)
            .map(|task| Removed::queued(task, Origin::ReservedWait))
    }

    /// Empty every collection and free the reserved slot.
    pub fn take_all(&mut self) -> Vec<Removed> {
        self.reserved_retiring = None;
        let mut removed = Vec::with_capacity(
            self.active.len() + self.queue.len() + self.reserved_waiting.len() + 1,
        );
        removed.extend(
            self.active
                .drain()
                .map(|(_, running)| Removed::running(running, Origin::Worker)),
        );
        if let Some(running) = self.reserved.take() {
            removed.push(Removed::running(running, Origin::ReservedSlot));
        }
        removed.extend(
            std::mem::take(&mut self.queue)
                .into_values()
                .map(|task| Removed::queued(task, Origin::Queue)),
        );
        removed.extend(
            self.reserved_waiting
                .drain(..)
                .map(|task| Removed::queued(task, Origin::ReservedWait)),
        );
        removed
    }

    /// Count and log a cancellation, deferring its hook and token.
    pub fn retire_cancelled(&mut self, removed: Removed, reason: &str, effects: &mut Effects) {
        let Removed {
            meta,
            origin,
            on_cancel,
            token,
        } = removed;
        self.metrics.record_cancelled(meta.kind);
        let state = match origin {
            Origin::Queue | Origin::ReservedWait => "queued",
            Origin::Worker | Origin::ReservedSlot => "running",
        };
        self.log.record(
            LogLevel::Warn,
            Some(meta.kind),
            format!("{} task {} cancelled: {}", state, meta.id, reason),
        );
        if let Some(token) = token {
            effects.tokens.push(token);
        }
        if let Some(hook) = on_cancel {
            effects.cancel_hooks.push((meta.id, hook));
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        if let Some(running) = self.active.get(&id) {
            return Some(running_snapshot(running));
        }
        if let Some(running) = self.reserved.as_ref().filter(|r| r.meta.id == id) {
            return Some(running_snapshot(running));
        }
        self.queue
            .values()
            .chain(self.reserved_waiting.iter())
            .find(|t| t.meta.id == id)
            .map(queued_snapshot)
    }

    pub fn listing(&self) -> TaskListing {
        let mut running: Vec<TaskSnapshot> = self.active.values().map(running_snapshot).collect();
        running.sort_by_key(|s| s.started_at);

        TaskListing {
            running,
            queued: self.queue.values().map(queued_snapshot).collect(),
            reserved_slot: ReservedSlotState {
                busy: self.reserved_busy(),
                running: self.reserved.as_ref().map(running_snapshot),
                waiting: self.reserved_waiting.iter().map(queued_snapshot).collect(),
            },
        }
    }
}

fn running_snapshot(running: &Running) -> TaskSnapshot {
    TaskSnapshot::from_meta(&running.meta, TaskStatus::Running, Some(running.started_at))
}

fn queued_snapshot(task: &Task) -> TaskSnapshot {
    TaskSnapshot::from_meta(&task.meta, TaskStatus::Queued, None)
}
