// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced storage wrappers for consistent observability

use super::{ElectionStorage, LeaderRecord, LockStorage, SemaphoreStorage};
use crate::error::StorageError;
use crate::lease::LockLease;
use async_trait::async_trait;
use std::future::Future;
use std::time::Instant;
use tracing::Instrument;

/// Run a storage call, logging its latency and outcome inside the current span
async fn traced<T, F>(fut: F) -> Result<T, StorageError>
where
    T: std::fmt::Debug,
    F: Future<Output = Result<T, StorageError>>,
{
    let start = Instant::now();
    let result = fut.await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(value) => tracing::debug!(elapsed_ms, ?value, "ok"),
        Err(e) => tracing::warn!(elapsed_ms, error = %e, "failed"),
    }
    result
}

/// Wrapper that adds tracing to any LockStorage
#[derive(Clone, Debug)]
pub struct TracedLockStorage<S> {
    inner: S,
}

impl<S> TracedLockStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: LockStorage> LockStorage for TracedLockStorage<S> {
    async fn acquire_lock(&self, lease: &LockLease) -> Result<bool, StorageError> {
        let span = tracing::debug_span!(
            "lock.acquire",
            resource = %lease.resource,
            holder = %lease.holder_id,
            lease_id = %lease.lease_id,
        );
        traced(self.inner.acquire_lock(lease)).instrument(span).await
    }

    async fn release_lock(&self, lease: &LockLease) -> Result<(), StorageError> {
        let span = tracing::debug_span!(
            "lock.release",
            resource = %lease.resource,
            lease_id = %lease.lease_id,
        );
        traced(self.inner.release_lock(lease)).instrument(span).await
    }

    async fn extend_lock(&self, lease: &LockLease) -> Result<(), StorageError> {
        let span = tracing::debug_span!(
            "lock.extend",
            resource = %lease.resource,
            lease_id = %lease.lease_id,
            expires_at = %lease.expires_at,
        );
        traced(self.inner.extend_lock(lease)).instrument(span).await
    }

    async fn get_lock(&self, resource: &str) -> Result<Option<LockLease>, StorageError> {
        let span = tracing::debug_span!("lock.get", resource);
        traced(self.inner.get_lock(resource)).instrument(span).await
    }
}

/// Wrapper that adds tracing to any ElectionStorage
#[derive(Clone, Debug)]
pub struct TracedElectionStorage<S> {
    inner: S,
}

impl<S> TracedElectionStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ElectionStorage> ElectionStorage for TracedElectionStorage<S> {
    async fn request_vote(
        &self,
        node_id: &str,
        term: u64,
        candidate_id: &str,
    ) -> Result<bool, StorageError> {
        let span = tracing::debug_span!("election.request_vote", node_id, term, candidate_id);
        traced(self.inner.request_vote(node_id, term, candidate_id))
            .instrument(span)
            .await
    }

    async fn send_heartbeat(&self, leader_id: &str, term: u64) -> Result<(), StorageError> {
        let span = tracing::debug_span!("election.heartbeat", leader_id, term);
        traced(self.inner.send_heartbeat(leader_id, term))
            .instrument(span)
            .await
    }

    async fn get_current_leader(&self) -> Result<Option<String>, StorageError> {
        let span = tracing::debug_span!("election.current_leader");
        traced(self.inner.get_current_leader())
            .instrument(span)
            .await
    }

    async fn get_leader_record(&self) -> Result<Option<LeaderRecord>, StorageError> {
        let span = tracing::debug_span!("election.leader_record");
        traced(self.inner.get_leader_record())
            .instrument(span)
            .await
    }
}

/// Wrapper that adds tracing to any SemaphoreStorage
#[derive(Clone, Debug)]
pub struct TracedSemaphoreStorage<S> {
    inner: S,
}

impl<S> TracedSemaphoreStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: SemaphoreStorage> SemaphoreStorage for TracedSemaphoreStorage<S> {
    async fn acquire_permit(&self, resource: &str) -> Result<bool, StorageError> {
        let span = tracing::debug_span!("semaphore.acquire", resource);
        traced(self.inner.acquire_permit(resource))
            .instrument(span)
            .await
    }

    async fn release_permit(&self, resource: &str) -> Result<(), StorageError> {
        let span = tracing::debug_span!("semaphore.release", resource);
        traced(self.inner.release_permit(resource))
            .instrument(span)
            .await
    }

    async fn get_available_permits(&self, resource: &str) -> Result<u32, StorageError> {
        let span = tracing::debug_span!("semaphore.available", resource);
        traced(self.inner.get_available_permits(resource))
            .instrument(span)
            .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
