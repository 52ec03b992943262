//! Integration tests for the background auto-scan coordinator and its loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netwatch_core::ExecutorConfig;
use netwatch_executor::{ExecutionManager, Task, TaskError, TaskKind, SYSTEM_SUBMITTER};
use tokio::sync::watch;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

fn manager() -> ExecutionManager {
    ExecutionManager::new(&ExecutorConfig::with_max_workers(2))
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A scan that runs until its token is cancelled.
fn endless_scan() -> Task {
    Task::scan(|token| async move {
        token.cancelled().await;
        Err(TaskError::Cancelled)
    })
}

#[tokio::test]
async fn launch_is_skipped_while_a_cycle_is_outstanding() {
    let manager = manager();
    let first = manager.launch_auto_scan(endless_scan).unwrap();
    assert!(first.is_some());

    let built = AtomicUsize::new(0);
    let second = manager
        .launch_auto_scan(|| {
            built.fetch_add(1, Ordering::SeqCst);
            endless_scan()
        })
        .unwrap();
    assert_eq!(second, None);
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(manager.current_auto_scan(), first);
}

#[tokio::test]
async fn auto_scan_is_queued_as_system_work() {
    let manager = manager();
    let id = manager
        .launch_auto_scan(|| {
            endless_scan()
                .with_immediate(true)
                .with_submitter("alice")
                .with_priority(1)
        })
        .unwrap()
        .unwrap();

    let snapshot = manager.get_task(id).unwrap();
    assert_eq!(snapshot.kind, TaskKind::Scan);
    assert!(!snapshot.immediate);
    assert_eq!(snapshot.submitter.as_deref(), Some(SYSTEM_SUBMITTER));
    assert_eq!(snapshot.priority, 1);
    assert!(!manager.list_tasks().reserved_slot.busy);
}

#[tokio::test]
async fn finished_cycle_frees_the_coordinator() {
    let manager = manager();
    manager
        .launch_auto_scan(|| Task::scan(|_| async { Ok(()) }))
        .unwrap()
        .unwrap();

    wait_for("cycle to finish", || !manager.auto_scan_running()).await;
    assert_eq!(manager.metrics().completed, 1);
    assert!(manager.launch_auto_scan(endless_scan).unwrap().is_some());
}

#[tokio::test]
async fn failed_or_panicking_cycle_frees_the_coordinator() {
    let manager = manager();
    manager
        .launch_auto_scan(|| Task::scan(|_| async { Err(TaskError::failed("host unreachable")) }))
        .unwrap();
    wait_for("failed cycle", || !manager.auto_scan_running()).await;

    manager
        .launch_auto_scan(|| Task::scan(|_| async { panic!("bad xml") }))
        .unwrap();
    wait_for("panicked cycle", || !manager.auto_scan_running()).await;
    assert_eq!(manager.metrics().failed, 2);
}

#[tokio::test]
async fn cancelled_cycle_frees_the_coordinator() {
    let manager = manager();
    let id = manager.launch_auto_scan(endless_scan).unwrap().unwrap();

    assert!(manager.cancel_task(id));
    assert!(!manager.auto_scan_running());
    assert!(manager
        .logs()
        .iter()
        .any(|l| l.contains(&format!("auto-scan {} interrupted: cancelled", id))));
    assert!(manager.launch_auto_scan(endless_scan).unwrap().is_some());
}

#[tokio::test]
async fn queued_auto_scan_is_preempted_before_it_starts() {
    let manager = ExecutionManager::new(&ExecutorConfig::with_max_workers(1));
    let blocker_id = manager.submit(endless_scan().with_immediate(false)).unwrap();

    let body_runs = Arc::new(AtomicUsize::new(0));
    let runs = Arc::clone(&body_runs);
    let auto_id = manager
        .launch_auto_scan(move || {
            Task::scan(move |_| async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .unwrap()
        .unwrap();
    assert!(manager.list_tasks().queued.iter().any(|s| s.id == auto_id));

    manager.submit(endless_scan().with_submitter("bob")).unwrap();
    assert!(manager.get_task(auto_id).is_none());
    assert!(!manager.auto_scan_running());

    manager.cancel_task(blocker_id);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(body_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_launch_leaves_coordinator_idle() {
    let manager = manager();
    manager.disconnect();
    assert!(manager.launch_auto_scan(endless_scan).is_err());
    assert!(!manager.auto_scan_running());
}

#[tokio::test]
async fn loop_launches_cycles_and_stops_on_shutdown() {
    let manager = manager();
    let cycles = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cycles);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = manager.spawn_auto_scan_loop(
        Duration::from_millis(10),
        move || {
            let counter = Arc::clone(&counter);
            Task::scan(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        },
        shutdown_rx,
    );

    wait_for("several cycles", || cycles.load(Ordering::SeqCst) >= 3).await;
    shutdown_tx.send(true).unwrap();
    timeout(TIMEOUT, handle)
        .await
        .expect("loop did not stop")
        .unwrap();

    let metrics = manager.metrics();
    assert!(metrics.submitted >= 3);
    assert_eq!(metrics.by_kind[&TaskKind::Scan].failed, 0);
}

#[tokio::test]
async fn loop_skips_ticks_while_a_cycle_runs() {
    let manager = manager();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = manager.spawn_auto_scan_loop(
        Duration::from_millis(5),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            endless_scan()
        },
        shutdown_rx,
    );

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(manager.metrics().submitted, 1);

    drop(shutdown_tx);
    timeout(TIMEOUT, handle)
        .await
        .expect("loop did not stop")
        .unwrap();
}
