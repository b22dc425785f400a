// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory reference backends
//!
//! Every operation runs under a single mutex, which is what makes the
//! check-and-set operations atomic. These are test doubles and single-process
//! backends; clones share state, so one instance can back many primitives.

use super::{ElectionStorage, LeaderRecord, LockStorage, SemaphoreStorage};
use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::lease::LockLease;
use crate::semaphore::SemaphoreConfig;
use crate::timer::Ticker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Default interval between expired-lease sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

// === Locks ===

/// Lease table keyed by resource
///
/// Expired entries are purged by a background sweep, started on the first
/// acquire from inside a tokio runtime and stopped when the last clone is
/// dropped.
#[derive(Clone, Debug)]
pub struct MemoryLockStorage<C: Clock = SystemClock> {
    leases: Arc<Mutex<HashMap<String, LockLease>>>,
    clock: C,
    sweep: Arc<SweepSchedule>,
}

#[derive(Debug)]
struct SweepSchedule {
    interval: Option<Duration>,
    ticker: OnceLock<Ticker>,
}

impl SweepSchedule {
    fn new(interval: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            interval,
            ticker: OnceLock::new(),
        })
    }
}

impl MemoryLockStorage<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryLockStorage<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryLockStorage<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            clock,
            sweep: SweepSchedule::new(Some(DEFAULT_SWEEP_INTERVAL)),
        }
    }

    /// Change the background sweep period; `None` disables it
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep = SweepSchedule::new(interval);
        self
    }

    /// Purge expired leases, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        purge_expired(&self.leases, self.clock.now())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// returned ticker is cancelled or dropped
    pub fn spawn_sweeper(&self, interval: Duration) -> Ticker {
        let storage = self.clone();
        Ticker::every(interval, move |_| {
            storage.sweep_expired();
            std::future::ready(ControlFlow::Continue(()))
        })
    }

    /// Whether the background sweep has been started
    pub fn is_sweeping(&self) -> bool {
        self.sweep.ticker.get().is_some_and(|t| !t.is_finished())
    }

    /// Start the background sweep once a runtime is available
    fn ensure_sweeper(&self) {
        let Some(interval) = self.sweep.interval else {
            return;
        };
        if self.sweep.ticker.get().is_some() || tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        // The ticker holds the table weakly so it cannot keep the storage alive
        let leases = Arc::downgrade(&self.leases);
        let clock = self.clock.clone();
        self.sweep.ticker.get_or_init(|| {
            tracing::debug!(interval = %humantime::format_duration(interval), "starting lease sweep");
            Ticker::every(interval, move |_| {
                let flow = match leases.upgrade() {
                    Some(leases) => {
                        purge_expired(&leases, clock.now());
                        ControlFlow::Continue(())
                    }
                    None => ControlFlow::Break(()),
                };
                std::future::ready(flow)
            })
        });
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn entry_count(&self) -> usize {
        self.leases.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn purge_expired(leases: &Mutex<HashMap<String, LockLease>>, now: DateTime<Utc>) -> usize {
    let mut leases = leases.lock().unwrap_or_else(|e| e.into_inner());
    let before = leases.len();
    leases.retain(|_, lease| lease.is_valid_at(now));
    let purged = before - leases.len();
    if purged > 0 {
        tracing::debug!(purged, "swept expired leases");
    }
    purged
}

#[async_trait]
impl<C: Clock> LockStorage for MemoryLockStorage<C> {
    async fn acquire_lock(&self, lease: &LockLease) -> Result<bool, StorageError> {
        self.ensure_sweeper();
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(current) = leases.get(&lease.resource) {
            if current.is_valid_at(now) {
                return Ok(false);
            }
        }
        leases.insert(lease.resource.clone(), lease.clone());
        Ok(true)
    }

    async fn release_lock(&self, lease: &LockLease) -> Result<(), StorageError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases
            .get(&lease.resource)
            .is_some_and(|current| current.lease_id == lease.lease_id)
        {
            leases.remove(&lease.resource);
        }
        Ok(())
    }

    async fn extend_lock(&self, lease: &LockLease) -> Result<(), StorageError> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());

        match leases.get_mut(&lease.resource) {
            Some(current) if current.lease_id == lease.lease_id => {
                if !current.is_valid_at(now) {
                    return Err(StorageError::LeaseExpired {
                        resource: lease.resource.clone(),
                        lease_id: lease.lease_id.clone(),
                    });
                }
                current.expires_at = lease.expires_at;
                Ok(())
            }
            _ => Err(StorageError::LeaseMismatch {
                resource: lease.resource.clone(),
                lease_id: lease.lease_id.clone(),
            }),
        }
    }

    async fn get_lock(&self, resource: &str) -> Result<Option<LockLease>, StorageError> {
        let now = self.clock.now();
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        Ok(leases
            .get(resource)
            .filter(|lease| lease.is_valid_at(now))
            .cloned())
    }
}

// === Election ===

/// Per-node persisted election record
#[derive(Clone, Debug, Default)]
struct NodeRecord {
    /// Highest term this node has voted in or heartbeated at
    term: u64,
    voted_for: Option<String>,
    heartbeat_term: Option<u64>,
    last_heartbeat_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ElectionTable {
    /// Fixed membership, if configured; otherwise records are created on demand
    members: Option<HashSet<String>>,
    records: HashMap<String, NodeRecord>,
    unreachable: HashSet<String>,
}

impl ElectionTable {
    fn record(&mut self, node_id: &str) -> Result<&mut NodeRecord, StorageError> {
        if self.unreachable.contains(node_id) {
            return Err(StorageError::Unavailable(format!(
                "node {} is unreachable",
                node_id
            )));
        }
        if let Some(members) = &self.members {
            if !members.contains(node_id) {
                return Err(StorageError::UnknownNode(node_id.to_string()));
            }
        }
        Ok(self.records.entry(node_id.to_string()).or_default())
    }

    fn highest_heartbeat_term(&self) -> Option<u64> {
        self.records.values().filter_map(|r| r.heartbeat_term).max()
    }
}

/// Vote and heartbeat records for every node
#[derive(Clone, Debug)]
pub struct MemoryElectionStorage<C: Clock = SystemClock> {
    table: Arc<Mutex<ElectionTable>>,
    clock: C,
}

impl MemoryElectionStorage<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryElectionStorage<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryElectionStorage<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            table: Arc::new(Mutex::new(ElectionTable::default())),
            clock,
        }
    }

    /// Restrict the backend to a fixed membership
    pub fn with_members<I, S>(self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).members =
            Some(members.into_iter().map(Into::into).collect());
        self
    }

    /// Simulate a node whose storage calls fail
    pub fn set_reachable(&self, node_id: &str, reachable: bool) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if reachable {
            table.unreachable.remove(node_id);
        } else {
            table.unreachable.insert(node_id.to_string());
        }
    }

    /// The vote a node cast at its latest term, as `(term, candidate)`
    pub fn vote_of(&self, node_id: &str) -> Option<(u64, String)> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let record = table.records.get(node_id)?;
        record.voted_for.clone().map(|c| (record.term, c))
    }
}

#[async_trait]
impl<C: Clock> ElectionStorage for MemoryElectionStorage<C> {
    async fn request_vote(
        &self,
        node_id: &str,
        term: u64,
        candidate_id: &str,
    ) -> Result<bool, StorageError> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let record = table.record(node_id)?;

        if term > record.term {
            record.term = term;
            record.voted_for = Some(candidate_id.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn send_heartbeat(&self, leader_id: &str, term: u64) -> Result<(), StorageError> {
        let now = self.clock.now();
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());

        let highest = table.highest_heartbeat_term().unwrap_or(0);
        let record = table.record(leader_id)?;
        let current_term = highest.max(record.term);
        if current_term > term {
            return Err(StorageError::StaleTerm {
                node_id: leader_id.to_string(),
                term,
                current_term,
            });
        }

        record.term = term;
        record.heartbeat_term = Some(term);
        record.last_heartbeat_at = Some(now);
        Ok(())
    }

    async fn get_leader_record(&self) -> Result<Option<LeaderRecord>, StorageError> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        Ok(table
            .records
            .iter()
            .filter_map(|(node_id, r)| {
                Some(LeaderRecord {
                    node_id: node_id.clone(),
                    term: r.heartbeat_term?,
                    last_heartbeat_at: r.last_heartbeat_at?,
                })
            })
            .max_by(|a, b| {
                (a.term, a.last_heartbeat_at, &a.node_id).cmp(&(
                    b.term,
                    b.last_heartbeat_at,
                    &b.node_id,
                ))
            }))
    }
}

// === Semaphores ===

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PermitCount {
    available: u32,
    max: u32,
}

#[derive(Debug, Default)]
struct PermitTable {
    resources: HashMap<String, PermitCount>,
    default_max: Option<u32>,
}

impl PermitTable {
    fn count(&mut self, resource: &str) -> Result<&mut PermitCount, StorageError> {
        if !self.resources.contains_key(resource) {
            let max = self
                .default_max
                .ok_or_else(|| StorageError::UnknownResource(resource.to_string()))?;
            self.resources.insert(
                resource.to_string(),
                PermitCount {
                    available: max,
                    max,
                },
            );
        }
        self.resources
            .get_mut(resource)
            .ok_or_else(|| StorageError::UnknownResource(resource.to_string()))
    }
}

/// Permit counters keyed by resource
#[derive(Clone, Debug, Default)]
pub struct MemorySemaphoreStorage {
    table: Arc<Mutex<PermitTable>>,
}

impl MemorySemaphoreStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend with every resource listed in `config`
    pub fn from_config(config: &SemaphoreConfig) -> Self {
        let storage = Self::new();
        {
            let mut table = storage.table.lock().unwrap_or_else(|e| e.into_inner());
            table.default_max = config.default_max_permits;
            for (resource, &max) in &config.permits {
                table.resources.insert(
                    resource.clone(),
                    PermitCount {
                        available: max,
                        max,
                    },
                );
            }
        }
        storage
    }

    /// Configure `resource` with `max_permits`, all of them available
    pub fn with_resource(self, resource: impl Into<String>, max_permits: u32) -> Self {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resources
            .insert(
                resource.into(),
                PermitCount {
                    available: max_permits,
                    max: max_permits,
                },
            );
        self
    }

    /// Maximum used for resources that were never configured
    pub fn with_default_max_permits(self, max_permits: u32) -> Self {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .default_max = Some(max_permits);
        self
    }

    pub fn max_permits(&self, resource: &str) -> Option<u32> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.resources.get(resource).map(|c| c.max)
    }
}

#[async_trait]
impl SemaphoreStorage for MemorySemaphoreStorage {
    async fn acquire_permit(&self, resource: &str) -> Result<bool, StorageError> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let count = table.count(resource)?;
        if count.available == 0 {
            return Ok(false);
        }
        count.available -= 1;
        Ok(true)
    }

    async fn release_permit(&self, resource: &str) -> Result<(), StorageError> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let count = table.count(resource)?;
        if count.available < count.max {
            count.available += 1;
        } else {
            tracing::warn!(resource, max = count.max, "release with all permits available");
        }
        Ok(())
    }

    async fn get_available_permits(&self, resource: &str) -> Result<u32, StorageError> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        Ok(table.count(resource)?.available)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
