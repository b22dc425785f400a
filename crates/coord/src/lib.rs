// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! oj-coord: coordination primitives for multi-instance oj services
//!
//! This crate provides:
//! - [`DistributedLock`]: lease-based mutual exclusion with heartbeat renewal
//! - [`LeaderElection`]: term-based majority election with randomized timeouts
//! - [`DistributedSemaphore`]: counting permits with a local FIFO wait queue
//! - Storage contracts for all three, plus in-memory and traced backends
//!
//! All cross-instance state lives in the storage backend. The primitives only
//! run client-side protocol logic: retries, lease renewal, vote counting and
//! state transitions.

pub mod clock;
pub mod config;
pub mod election;
pub mod error;
pub mod events;
pub mod lease;
pub mod lock;
pub mod semaphore;
pub mod storage;
pub mod timer;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::CoordinationConfig;
pub use election::{ElectionConfig, ElectionEvent, ElectionState, LeaderElection, Role};
pub use error::{
    ConfigError, ElectionError, LockError, LockErrorCode, SemaphoreError, StorageError,
};
pub use events::{EventReceiver, NamedEvent};
pub use lease::{HolderId, LockLease};
pub use lock::{shutdown_signal, DistributedLock, LockConfig, LockEvent};
pub use semaphore::{DistributedSemaphore, SemaphoreConfig};
pub use storage::{
    ElectionStorage, LeaderRecord, LockStorage, MemoryElectionStorage, MemoryLockStorage,
    MemorySemaphoreStorage, SemaphoreStorage, TracedElectionStorage, TracedLockStorage,
    TracedSemaphoreStorage, DEFAULT_SWEEP_INTERVAL,
};
pub use timer::Ticker;
