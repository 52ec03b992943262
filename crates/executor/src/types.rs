use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::{TaskContext, TaskId, TaskKind, TaskMeta};

/// Status of a tracked task. Terminal tasks leave the scheduler, so their
/// outcome shows up only in the metrics and the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
}

/// Point-in-time view of a tracked task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub kind: TaskKind,
    pub submitter: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub immediate: bool,
    pub dependencies: Vec<TaskId>,
    pub context: Option<TaskContext>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub(crate) fn from_meta(
        meta: &TaskMeta,
        status: TaskStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: meta.id,
            kind: meta.kind,
            submitter: meta.submitter.clone(),
            status,
            priority: meta.priority,
            immediate: meta.immediate,
            dependencies: meta.dependencies.clone(),
            context: meta.context.clone(),
            created_at: meta.created_at,
            started_at,
        }
    }
}

/// State of the single reserved lane for immediate tasks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReservedSlotState {
    pub busy: bool,
    pub running: Option<TaskSnapshot>,
    /// Immediate tasks parked until the slot frees, in start order.
    pub waiting: Vec<TaskSnapshot>,
}

/// Snapshot returned by `list_tasks`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskListing {
    pub running: Vec<TaskSnapshot>,
    /// Queued tasks in drain order (highest priority first, FIFO within a priority).
    pub queued: Vec<TaskSnapshot>,
    pub reserved_slot: ReservedSlotState,
}
