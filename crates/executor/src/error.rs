use thiserror::Error;

use crate::task::TaskId;

/// Errors surfaced to producers and administrative callers.
///
/// Task-body failures never appear here; they are logged and counted.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("task {0} rejected: executor is not accepting work")]
    Rejected(TaskId),

    #[error("config error: {0}")]
    Config(#[from] netwatch_core::ConfigError),
}
