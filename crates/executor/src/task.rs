//! The unit of schedulable work.
//!
//! A [`Task`] pairs immutable metadata (id, kind, priority, lane, submitter,
//! dependencies, context) with an async body and optional cancel/error hooks.
//! Kinds only differ in their default priority and lane; the scheduler never
//! looks past the tag.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Submitter recorded on internally generated work.
pub const SYSTEM_SUBMITTER: &str = "system";

/// Upper bound on labels carried by a [`TaskContext`].
pub const MAX_CONTEXT_LABELS: usize = 16;

// ── Identity ─────────────────────────────────────────────────────────

/// Opaque task identifier, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── Kind ─────────────────────────────────────────────────────────────

/// Classification used for preemption policy and log tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Network discovery (nmap sweeps, SNMP walks).
    Scan,
    /// Topology rebuild from discovered devices.
    Topology,
    /// Short user-triggered side effects (logout, notifications).
    User,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Scan => "scan",
            TaskKind::Topology => "topology",
            TaskKind::User => "user",
        }
    }

    /// Queue priority a task of this kind starts with.
    pub fn default_priority(self) -> i32 {
        match self {
            TaskKind::Scan => 5,
            TaskKind::Topology => 3,
            TaskKind::User => 10,
        }
    }

    /// Whether a task of this kind starts on the immediate lane.
    pub fn default_immediate(self) -> bool {
        matches!(self, TaskKind::User)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Context ──────────────────────────────────────────────────────────

/// Typed payload describing what a task operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Scan target, device id, or similar.
    pub target: Option<String>,
    labels: BTreeMap<String, String>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Add a label. Returns `false` once [`MAX_CONTEXT_LABELS`] distinct keys
    /// are held and `key` is not one of them.
    pub fn insert_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.labels.len() >= MAX_CONTEXT_LABELS && !self.labels.contains_key(&key) {
            return false;
        }
        self.labels.insert(key, value.into());
        true
    }

    /// Builder form of [`insert_label`](Self::insert_label); labels past the cap are dropped.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_label(key, value);
        self
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

// ── Outcome ──────────────────────────────────────────────────────────

/// Error returned by a task body.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The body observed its cancellation token and stopped.
    #[error("task cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }
}

pub type TaskResult = Result<(), TaskError>;

/// Async body, invoked at most once with the task's cancellation token.
pub type TaskBody = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, TaskResult> + Send>;

/// Cleanup hook run when the task is cancelled, whether or not the body started.
pub type CancelHook = Box<dyn FnOnce() + Send>;

/// Receives the body's error instead of the scheduler's generic error log.
pub type ErrorHook = Box<dyn FnOnce(&TaskError) + Send>;

// ── Task ─────────────────────────────────────────────────────────────

/// Immutable task metadata, shared by queue entries, running entries and snapshots.
#[derive(Debug, Clone)]
pub(crate) struct TaskMeta {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: i32,
    pub immediate: bool,
    pub submitter: Option<String>,
    pub dependencies: Vec<TaskId>,
    pub context: Option<TaskContext>,
    pub created_at: DateTime<Utc>,
}

/// A unit of asynchronous work submitted to the scheduler.
///
/// # Example
/// ```ignore
/// let task = Task::new(TaskKind::Scan, |cancel| async move {
///     tokio::select! {
///         _ = cancel.cancelled() => Err(TaskError::Cancelled),
///         r = sweep("10.0.0.0/24") => r,
///     }
/// })
/// .with_priority(8)
/// .with_submitter("alice");
/// ```
pub struct Task {
    pub(crate) meta: TaskMeta,
    pub(crate) body: TaskBody,
    pub(crate) on_cancel: Option<CancelHook>,
    pub(crate) on_error: Option<ErrorHook>,
}

impl Task {
    /// Create a task of `kind` with that kind's default priority and lane.
    pub fn new<F, Fut>(kind: TaskKind, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            meta: TaskMeta {
                id: TaskId::new(),
                kind,
                priority: kind.default_priority(),
                immediate: kind.default_immediate(),
                submitter: None,
                dependencies: Vec::new(),
                context: None,
                created_at: Utc::now(),
            },
            body: Box::new(move |token| body(token).boxed()),
            on_cancel: None,
            on_error: None,
        }
    }

    pub fn scan<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self::new(TaskKind::Scan, body)
    }

    pub fn topology<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self::new(TaskKind::Topology, body)
    }

    pub fn user<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self::new(TaskKind::User, body)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.meta.priority = priority;
        self
    }

    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.meta.immediate = immediate;
        self
    }

    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.meta.submitter = Some(submitter.into());
        self
    }

    /// Hold this task in the queue until `dependency` is no longer tracked.
    pub fn depends_on(mut self, dependency: TaskId) -> Self {
        if dependency != self.meta.id && !self.meta.dependencies.contains(&dependency) {
            self.meta.dependencies.push(dependency);
        }
        self
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.meta.context = Some(context);
        self
    }

    pub fn on_cancel(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl FnOnce(&TaskError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> TaskId {
        self.meta.id
    }

    pub fn kind(&self) -> TaskKind {
        self.meta.kind
    }

    pub fn priority(&self) -> i32 {
        self.meta.priority
    }

    pub fn is_immediate(&self) -> bool {
        self.meta.immediate
    }

    pub fn submitter(&self) -> Option<&str> {
        self.meta.submitter.as_deref()
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.meta.dependencies
    }

    pub fn context(&self) -> Option<&TaskContext> {
        self.meta.context.as_ref()
    }

    /// Replace the cancel hook with one built around the current hook.
    pub(crate) fn wrap_on_cancel(
        mut self,
        wrap: impl FnOnce(Option<CancelHook>) -> CancelHook,
    ) -> Self {
        let inner = self.on_cancel.take();
        self.on_cancel = Some(wrap(inner));
        self
    }

    /// Replace the body with one built around the current body.
    pub(crate) fn wrap_body(mut self, wrap: impl FnOnce(TaskBody) -> TaskBody) -> Self {
        let noop: TaskBody = Box::new(|_| async { Ok(()) }.boxed());
        let inner = std::mem::replace(&mut self.body, noop);
        self.body = wrap(inner);
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.meta.id)
            .field("kind", &self.meta.kind)
            .field("priority", &self.meta.priority)
            .field("immediate", &self.meta.immediate)
            .field("submitter", &self.meta.submitter)
            .field("dependencies", &self.meta.dependencies)
            .field("has_on_cancel", &self.on_cancel.is_some())
            .field("has_on_error", &self.on_error.is_some())
            .finish()
    }
}
