use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::task::TaskKind;

/// Per-kind execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindMetrics {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Mean wall time of bodies that settled while tracked.
    pub avg_duration: Duration,
    #[serde(skip)]
    executions: u64,
}

/// Monotonic scheduler counters exposed to the admin surface.
///
/// Every admitted task eventually adds exactly one to `completed`, `failed`
/// or `cancelled`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub by_kind: HashMap<TaskKind, KindMetrics>,
}

impl ExecutionMetrics {
    /// Count an admitted task.
    pub fn record_submitted(&mut self) {
        self.submitted += 1;
    }

    /// Record a successful settlement and its duration.
    pub fn record_completed(&mut self, kind: TaskKind, duration: Duration) {
        self.completed += 1;
        let entry = self.by_kind.entry(kind).or_default();
        entry.completed += 1;
        entry.record_duration(duration);
    }

    /// Record a failed or panicked settlement and its duration.
    pub fn record_failed(&mut self, kind: TaskKind, duration: Duration) {
        self.failed += 1;
        let entry = self.by_kind.entry(kind).or_default();
        entry.failed += 1;
        entry.record_duration(duration);
    }

    /// Record a cancellation. Cancelled bodies contribute no duration.
    pub fn record_cancelled(&mut self, kind: TaskKind) {
        self.cancelled += 1;
        self.by_kind.entry(kind).or_default().cancelled += 1;
    }

    /// Tasks that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// Admitted tasks still queued or running.
    pub fn outstanding(&self) -> u64 {
        self.submitted.saturating_sub(self.settled())
    }
}

impl KindMetrics {
    fn record_duration(&mut self, duration: Duration) {
        self.executions += 1;

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_duration = if self.executions == 1 {
            duration
        } else {
            let prev_nanos = self.avg_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.executions as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = ExecutionMetrics::default();
        m.record_submitted();
        m.record_completed(TaskKind::Scan, Duration::from_millis(100));

        assert_eq!(m.completed, 1);
        assert_eq!(m.by_kind[&TaskKind::Scan].completed, 1);
        assert_eq!(m.by_kind[&TaskKind::Scan].avg_duration, Duration::from_millis(100));
        assert_eq!(m.outstanding(), 0);
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = ExecutionMetrics::default();
        m.record_completed(TaskKind::Topology, Duration::from_millis(100));
        m.record_failed(TaskKind::Topology, Duration::from_millis(200));

        let topo = &m.by_kind[&TaskKind::Topology];
        assert_eq!(topo.completed, 1);
        assert_eq!(topo.failed, 1);
        // Average of 100ms and 200ms = 150ms
        let avg = topo.avg_duration.as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn cancellation_does_not_touch_average() {
        let mut m = ExecutionMetrics::default();
        m.record_completed(TaskKind::User, Duration::from_millis(10));
        m.record_cancelled(TaskKind::User);

        assert_eq!(m.cancelled, 1);
        assert_eq!(m.by_kind[&TaskKind::User].avg_duration, Duration::from_millis(10));
    }

    #[test]
    fn outstanding_counts_unsettled() {
        let mut m = ExecutionMetrics::default();
        for _ in 0..4 {
            m.record_submitted();
        }
        m.record_completed(TaskKind::Scan, Duration::ZERO);
        m.record_cancelled(TaskKind::Scan);
        assert_eq!(m.settled(), 2);
        assert_eq!(m.outstanding(), 2);
    }

    #[test]
    fn default_metrics() {
        let m = ExecutionMetrics::default();
        assert_eq!(m.submitted, 0);
        assert!(m.by_kind.is_empty());
    }
}
