//! Semaphore permit specs
//!
//! Verify permit accounting and hand-over to blocked acquirers.

use crate::prelude::*;

async fn wait_until_queued(sem: &DistributedSemaphore<MemorySemaphoreStorage>, count: usize) {
    while sem.waiting().await < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn blocked_acquire_resumes_on_release() {
    let storage = MemorySemaphoreStorage::new().with_resource("r", 1);
    let sem = DistributedSemaphore::new("r", storage);

    sem.acquire().await.unwrap();
    let blocked = {
        let sem = sem.clone();
        tokio::spawn(async move { sem.acquire().await })
    };
    wait_until_queued(&sem, 1).await;
    assert!(!blocked.is_finished());

    sem.release().await.unwrap();
    blocked.await.unwrap().unwrap();

    // Both acquires resolved, nothing released on net
    assert_eq!(sem.get_available_permits().await.unwrap(), 0);
}

#[tokio::test]
async fn permits_never_exceed_configured_maximum() {
    let config = CoordinationConfig::from_toml_str("[semaphore.permits]\nbuild = 3\n").unwrap();
    let storage = MemorySemaphoreStorage::from_config(&config.semaphore);
    let sem = DistributedSemaphore::new("build", storage.clone());

    for _ in 0..3 {
        sem.acquire().await.unwrap();
    }
    assert!(sem
        .acquire_timeout(Duration::from_millis(10))
        .await
        .is_err());

    for _ in 0..5 {
        sem.release().await.unwrap();
    }
    assert_eq!(sem.get_available_permits().await.unwrap(), 3);
    assert_eq!(storage.max_permits("build"), Some(3));
}

#[tokio::test]
async fn waiters_are_served_first_come_first_served() {
    let storage = MemorySemaphoreStorage::new().with_resource("r", 1);
    let sem = DistributedSemaphore::new("r", storage);
    sem.acquire().await.unwrap();

    let (tx, mut order) = tokio::sync::mpsc::unbounded_channel();
    for i in 0..3 {
        let waiter = sem.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            waiter.acquire().await.unwrap();
            tx.send(i).unwrap();
        });
        wait_until_queued(&sem, i + 1).await;
    }

    for expected in 0..3 {
        sem.release().await.unwrap();
        assert_eq!(order.recv().await, Some(expected));
    }
    assert_eq!(sem.get_available_permits().await.unwrap(), 0);
}
