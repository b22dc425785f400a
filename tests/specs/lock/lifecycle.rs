//! Lock lifecycle specs
//!
//! Verify heartbeats, loss detection and shutdown release.

use crate::prelude::*;

fn config() -> LockConfig {
    LockConfig::new()
        .with_timeout(Duration::from_secs(10))
        .with_retry_interval(Duration::from_millis(500))
        .with_heartbeat_interval(Duration::from_secs(5))
        .with_auto_release_on_exit(false)
}

#[tokio::test(start_paused = true)]
async fn heartbeats_keep_the_lease_past_its_timeout() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let lock = lock_for("jobs", "worker-1", &storage, &clock, config());
    let mut events = lock.subscribe();
    let lease = lock.acquire().await.unwrap();

    for _ in 0..5 {
        clock.advance(Duration::from_secs(5));
        wait_for(&mut events, |e| matches!(e, LockEvent::Heartbeat { .. })).await;
    }

    // 25s of wall-clock time against a 10s lease
    let stored = storage.get_lock("jobs").await.unwrap().unwrap();
    assert_eq!(stored.lease_id, lease.lease_id);
    assert!(stored.expires_at > clock.now());
    lock.release().await;
}

#[tokio::test(start_paused = true)]
async fn takeover_is_reported_as_lost() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let stalled = lock_for("jobs", "stalled", &storage, &clock, config());
    let mut events = stalled.subscribe();
    stalled.acquire().await.unwrap();

    clock.advance(Duration::from_secs(30));
    let rival = lock_for("jobs", "rival", &storage, &clock, config());
    rival.acquire().await.unwrap();

    let event = wait_for(&mut events, |e| matches!(e, LockEvent::Lost { .. })).await;
    assert_eq!(event.name(), "lost");
    assert!(!stalled.is_held());
    assert!(rival.is_held());
    rival.release().await;
}

#[tokio::test(start_paused = true)]
async fn release_emits_released_once() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let lock = lock_for("jobs", "worker-1", &storage, &clock, config());
    let mut events = lock.subscribe();

    lock.acquire().await.unwrap();
    lock.release().await;
    lock.release().await;

    let names: Vec<_> = drain(&mut events).iter().map(|e| e.name()).collect();
    assert_eq!(names, ["acquired", "released"]);
    assert!(storage.get_lock("jobs").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_signal_releases_the_lock() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let lock = lock_for("jobs", "worker-1", &storage, &clock, config());
    let mut events = lock.subscribe();
    let (shutdown, signal) = tokio::sync::oneshot::channel::<()>();

    lock.release_on(async move {
        let _ = signal.await;
    });
    lock.acquire().await.unwrap();

    shutdown.send(()).unwrap();
    wait_for(&mut events, |e| matches!(e, LockEvent::Released { .. })).await;
    assert!(storage.get_lock("jobs").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn with_lock_runs_exclusively_and_releases() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let lock = lock_for("jobs", "worker-1", &storage, &clock, config());

    let holder = lock
        .with_lock(|lease| async move { lease.holder_id })
        .await
        .unwrap();

    assert_eq!(holder, HolderId::new("worker-1"));
    assert!(storage.get_lock("jobs").await.unwrap().is_none());
}
