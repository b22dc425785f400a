// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage contracts the coordination primitives are built on
//!
//! Cross-instance correctness rests entirely on three operations being single
//! atomic read-modify-writes in the backend: [`LockStorage::acquire_lock`],
//! [`ElectionStorage::request_vote`] and [`SemaphoreStorage::acquire_permit`].
//! A durable backend must implement them with compare-and-swap or a native
//! transaction. When two candidates race for votes at the same term, the
//! first write to reach a node's record wins; the loser is refused.

mod memory;
mod traced;

pub use memory::{
    MemoryElectionStorage, MemoryLockStorage, MemorySemaphoreStorage, DEFAULT_SWEEP_INTERVAL,
};
pub use traced::{TracedElectionStorage, TracedLockStorage, TracedSemaphoreStorage};

use crate::error::StorageError;
use crate::lease::LockLease;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend for [`DistributedLock`](crate::DistributedLock)
#[async_trait]
pub trait LockStorage: Send + Sync + 'static {
    /// Store `lease` iff no unexpired lease exists for its resource
    async fn acquire_lock(&self, lease: &LockLease) -> Result<bool, StorageError>;

    /// Delete the lease; a no-op when `lease_id` is not the current holder
    async fn release_lock(&self, lease: &LockLease) -> Result<(), StorageError>;

    /// Move the stored lease's expiry to `lease.expires_at`
    ///
    /// Fails when `lease_id` is no longer the current, unexpired holder.
    async fn extend_lock(&self, lease: &LockLease) -> Result<(), StorageError>;

    /// The live lease on `resource`, if any
    async fn get_lock(&self, resource: &str) -> Result<Option<LockLease>, StorageError>;
}

/// The heartbeat record the current leader is derived from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRecord {
    pub node_id: String,
    pub term: u64,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// Backend for [`LeaderElection`](crate::LeaderElection)
#[async_trait]
pub trait ElectionStorage: Send + Sync + 'static {
    /// Ask `node_id` for its vote at `term`
    ///
    /// Granted iff `term` exceeds the node's last recorded term; a node never
    /// grants two votes at the same term.
    async fn request_vote(
        &self,
        node_id: &str,
        term: u64,
        candidate_id: &str,
    ) -> Result<bool, StorageError>;

    /// Record a leader heartbeat; refused when a higher term is known
    async fn send_heartbeat(&self, leader_id: &str, term: u64) -> Result<(), StorageError>;

    /// Node with the highest `(term, last_heartbeat_at)` heartbeat record
    async fn get_current_leader(&self) -> Result<Option<String>, StorageError> {
        Ok(self.get_leader_record().await?.map(|r| r.node_id))
    }

    /// The full record behind [`get_current_leader`](Self::get_current_leader)
    async fn get_leader_record(&self) -> Result<Option<LeaderRecord>, StorageError>;
}

/// Backend for [`DistributedSemaphore`](crate::DistributedSemaphore)
#[async_trait]
pub trait SemaphoreStorage: Send + Sync + 'static {
    /// Take one permit if any is available
    async fn acquire_permit(&self, resource: &str) -> Result<bool, StorageError>;

    /// Return one permit, never exceeding the resource's maximum
    async fn release_permit(&self, resource: &str) -> Result<(), StorageError>;

    async fn get_available_permits(&self, resource: &str) -> Result<u32, StorageError>;
}
