// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock lease records shared through storage

use crate::clock::to_chrono;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a lock holder (one per process/instance)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(pub String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random holder id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A time-bounded claim on a named resource
///
/// The `lease_id` is fresh on every acquisition, so a holder can tell its own
/// lease apart from one a different holder took after it expired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub lease_id: String,
    pub holder_id: HolderId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resource: String,
}

impl LockLease {
    pub fn new(
        resource: impl Into<String>,
        holder_id: HolderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            lease_id: uuid::Uuid::new_v4().to_string(),
            holder_id,
            acquired_at: now,
            expires_at: now + to_chrono(ttl),
            resource: resource.into(),
        }
    }

    /// A lease is valid only while `now < expires_at`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Same lease with its expiry pushed to `now + ttl`
    pub fn renewed(&self, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            expires_at: now + to_chrono(ttl),
            ..self.clone()
        }
    }

    /// Whether `other` is the very same lease (not merely the same holder)
    pub fn same_lease(&self, other: &LockLease) -> bool {
        self.lease_id == other.lease_id && self.resource == other.resource
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
