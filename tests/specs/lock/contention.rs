//! Lock contention specs
//!
//! Verify exclusivity, retry timing and takeover after expiry.

use crate::prelude::*;
use tokio::time::Instant;

fn config() -> LockConfig {
    LockConfig::new()
        .with_timeout(Duration::from_secs(10))
        .with_retry_interval(Duration::from_millis(500))
        .with_heartbeat_interval(Duration::from_secs(3))
        .with_auto_release_on_exit(false)
}

#[tokio::test(start_paused = true)]
async fn acquire_against_held_resource_times_out_after_budget() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let owner = lock_for("deploy", "owner", &storage, &clock, config());
    owner.acquire().await.unwrap();

    let contender = lock_for(
        "deploy",
        "contender",
        &storage,
        &clock,
        config()
            .with_timeout(Duration::from_millis(2000))
            .with_retry_interval(Duration::from_millis(500)),
    );
    let start = Instant::now();
    let err = contender.acquire().await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.code(), LockErrorCode::Timeout);
    assert_eq!(err.code().to_string(), "TIMEOUT");
    assert!(matches!(err, LockError::Timeout { attempts: 4, .. }));
    assert!(elapsed >= Duration::from_millis(2000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2100), "{:?}", elapsed);
    assert!(owner.is_held());
    owner.release().await;
}

#[tokio::test(start_paused = true)]
async fn holders_alternate_but_never_overlap() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let first = lock_for("deploy", "first", &storage, &clock, config());
    let second = lock_for("deploy", "second", &storage, &clock, config());

    let lease = first.acquire().await.unwrap();
    assert_eq!(
        second.acquire().await.unwrap_err().code(),
        LockErrorCode::Timeout
    );

    first.release().await;
    let next = second.acquire().await.unwrap();
    assert_ne!(next.lease_id, lease.lease_id);
    assert_eq!(
        storage.get_lock("deploy").await.unwrap().map(|l| l.holder_id),
        Some(HolderId::new("second"))
    );
    second.release().await;
}

#[tokio::test(start_paused = true)]
async fn distinct_resources_do_not_contend() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());
    let a = lock_for("alpha", "h", &storage, &clock, config());
    let b = lock_for("beta", "h", &storage, &clock, config());

    a.acquire().await.unwrap();
    b.acquire().await.unwrap();
    assert!(a.is_held() && b.is_held());
    a.release().await;
    b.release().await;
}

#[tokio::test(start_paused = true)]
async fn crashed_holder_is_superseded_after_expiry() {
    let clock = FakeClock::new();
    let storage = MemoryLockStorage::with_clock(clock.clone());

    // A holder that acquired and then vanished without releasing
    let crashed = LockLease::new("deploy", HolderId::new("crashed"), clock.now(), Duration::from_secs(10));
    assert!(storage.acquire_lock(&crashed).await.unwrap());

    let survivor = lock_for("deploy", "survivor", &storage, &clock, config().with_max_retries(1));
    assert!(survivor.acquire().await.is_err());

    clock.advance(Duration::from_secs(10));
    survivor.acquire().await.unwrap();
    assert_eq!(storage.sweep_expired(), 0);
    survivor.release().await;
}

#[tokio::test(start_paused = true)]
async fn traced_backend_behaves_like_inner() {
    let clock = FakeClock::new();
    let storage = TracedLockStorage::new(MemoryLockStorage::with_clock(clock.clone()));
    let lock = DistributedLock::with_clock("deploy", HolderId::new("h"), storage, config(), clock);

    let lease = lock.acquire().await.unwrap();
    assert_eq!(lock.lease(), Some(lease));
    lock.release().await;
    assert!(!lock.is_held());
}
