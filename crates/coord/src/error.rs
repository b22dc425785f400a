// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for coordination primitives and their storage backends

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("lease {lease_id} is not the current holder of {resource}")]
    LeaseMismatch { resource: String, lease_id: String },
    #[error("lease {lease_id} on {resource} has expired")]
    LeaseExpired { resource: String, lease_id: String },
    #[error("heartbeat from {node_id} at term {term} is stale (term {current_term} exists)")]
    StaleTerm {
        node_id: String,
        term: u64,
        current_term: u64,
    },
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("unknown semaphore resource: {0}")]
    UnknownResource(String),
    #[error("storage call timed out: {0}")]
    TimedOut(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Machine-readable lock error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockErrorCode {
    Timeout,
    Held,
    Expired,
    Released,
    Cancelled,
    Storage,
}

impl LockErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockErrorCode::Timeout => "TIMEOUT",
            LockErrorCode::Held => "HELD",
            LockErrorCode::Expired => "EXPIRED",
            LockErrorCode::Released => "RELEASED",
            LockErrorCode::Cancelled => "CANCELLED",
            LockErrorCode::Storage => "STORAGE",
        }
    }
}

impl std::fmt::Display for LockErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`DistributedLock`](crate::DistributedLock) operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out acquiring lock on {resource} after {attempts} attempts")]
    Timeout { resource: String, attempts: u32 },
    #[error("lock on {0} is already held by this instance")]
    Held(String),
    #[error("lease {lease_id} on {resource} expired before it could be renewed")]
    Expired { resource: String, lease_id: String },
    #[error("lock on {0} is not held")]
    Released(String),
    #[error("acquisition of {0} was cancelled")]
    Cancelled(String),
    #[error("storage error acquiring {resource} after {attempts} attempts: {source}")]
    Storage {
        resource: String,
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

impl LockError {
    pub fn code(&self) -> LockErrorCode {
        match self {
            LockError::Timeout { .. } => LockErrorCode::Timeout,
            LockError::Held(_) => LockErrorCode::Held,
            LockError::Expired { .. } => LockErrorCode::Expired,
            LockError::Released(_) => LockErrorCode::Released,
            LockError::Cancelled(_) => LockErrorCode::Cancelled,
            LockError::Storage { .. } => LockErrorCode::Storage,
        }
    }
}

/// Errors returned by [`LeaderElection`](crate::LeaderElection) operations
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("election for node {0} has been stopped")]
    Stopped(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors returned by [`DistributedSemaphore`](crate::DistributedSemaphore) operations
#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("timed out waiting for a permit on {0}")]
    Timeout(String),
    #[error("semaphore {0} was closed while waiting")]
    Closed(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
