//! Shared helpers for coordination specs

pub use oj_coord::*;
pub use std::time::Duration;

pub type Locks = MemoryLockStorage<FakeClock>;
pub type Elections = MemoryElectionStorage<FakeClock>;

/// A lock on `resource` for `holder`, sharing `storage` and `clock`
pub fn lock_for(
    resource: &str,
    holder: &str,
    storage: &Locks,
    clock: &FakeClock,
    config: LockConfig,
) -> DistributedLock<Locks, FakeClock> {
    DistributedLock::with_clock(
        resource,
        HolderId::new(holder),
        storage.clone(),
        config,
        clock.clone(),
    )
}

/// Collect every event already delivered to `events`
pub fn drain<E>(events: &mut EventReceiver<E>) -> Vec<E> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for<E, F>(events: &mut EventReceiver<E>, mut pred: F) -> E
where
    F: FnMut(&E) -> bool,
{
    loop {
        match events.recv().await {
            Some(event) if pred(&event) => return event,
            Some(_) => {}
            None => panic!("event channel closed"),
        }
    }
}
