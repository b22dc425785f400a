// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Counting semaphore over shared [`SemaphoreStorage`]
//!
//! Permits are counted in storage. Waiters are queued locally, so only a
//! `release` on the same instance wakes them; a release on another instance
//! frees the permit in storage but does not resume anyone here.

use crate::error::{ConfigError, SemaphoreError};
use crate::storage::SemaphoreStorage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Per-resource permit limits
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemaphoreConfig {
    /// Maximum permits keyed by resource name
    pub permits: BTreeMap<String, u32>,
    /// Limit applied to resources not listed in `permits`
    pub default_max_permits: Option<u32>,
}

impl SemaphoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permits(mut self, resource: impl Into<String>, max_permits: u32) -> Self {
        self.permits.insert(resource.into(), max_permits);
        self
    }

    pub fn with_default_max_permits(mut self, max_permits: u32) -> Self {
        self.default_max_permits = Some(max_permits);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((resource, _)) = self.permits.iter().find(|(_, &max)| max == 0) {
            return Err(ConfigError::Invalid {
                field: "semaphore.permits",
                reason: format!("{} must allow at least one permit", resource),
            });
        }
        if self.default_max_permits == Some(0) {
            return Err(ConfigError::Invalid {
                field: "semaphore.default_max_permits",
                reason: "must allow at least one permit".to_string(),
            });
        }
        Ok(())
    }
}

struct SemaphoreInner<S> {
    resource: String,
    storage: S,
    /// Local FIFO of suspended acquirers. Held across storage calls so a
    /// hand-over and a fresh acquire can never interleave.
    waiters: Mutex<VecDeque<oneshot::Sender<()>>>,
}

/// A cross-instance counting semaphore for one resource
///
/// Cloning yields another handle sharing the same local wait queue.
pub struct DistributedSemaphore<S: SemaphoreStorage> {
    inner: Arc<SemaphoreInner<S>>,
}

impl<S: SemaphoreStorage> Clone for DistributedSemaphore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SemaphoreStorage> DistributedSemaphore<S> {
    pub fn new(resource: impl Into<String>, storage: S) -> Self {
        Self {
            inner: Arc::new(SemaphoreInner {
                resource: resource.into(),
                storage,
                waiters: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    /// Take a permit, waiting in line behind earlier local acquirers
    ///
    /// Returns once a permit is held, either taken directly or handed over
    /// by a local [`release`](Self::release).
    pub async fn acquire(&self) -> Result<(), SemaphoreError> {
        let inner = &self.inner;
        let handed_over = {
            let mut waiters = inner.waiters.lock().await;
            waiters.retain(|w| !w.is_closed());

            if waiters.is_empty() && inner.storage.acquire_permit(&inner.resource).await? {
                tracing::debug!(resource = %inner.resource, "permit acquired");
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            waiters.push_back(tx);
            tracing::debug!(resource = %inner.resource, queued = waiters.len(), "waiting for permit");
            rx
        };

        handed_over
            .await
            .map_err(|_| SemaphoreError::Closed(inner.resource.clone()))?;
        tracing::debug!(resource = %inner.resource, "permit handed over");
        Ok(())
    }

    /// [`acquire`](Self::acquire) bounded by `timeout`
    ///
    /// A waiter that times out is dropped from the queue and never consumes a
    /// permit.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<(), SemaphoreError> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    resource = %self.inner.resource,
                    timeout = %humantime::format_duration(timeout),
                    "permit wait timed out"
                );
                Err(SemaphoreError::Timeout(self.inner.resource.clone()))
            }
        }
    }

    /// Return a permit and hand permits to local waiters while storage
    /// grants them
    ///
    /// Fails only if storage rejects the release itself. A hand-over that
    /// fails leaves the waiter queued.
    pub async fn release(&self) -> Result<(), SemaphoreError> {
        let inner = &self.inner;
        let mut waiters = inner.waiters.lock().await;
        inner.storage.release_permit(&inner.resource).await?;

        while let Some(waiter) = waiters.pop_front() {
            if waiter.is_closed() {
                continue;
            }
            match inner.storage.acquire_permit(&inner.resource).await {
                Ok(true) => {
                    if waiter.send(()).is_err() {
                        // Gave up after the permit was taken for it
                        if let Err(e) = inner.storage.release_permit(&inner.resource).await {
                            tracing::error!(resource = %inner.resource, error = %e, "returning abandoned permit failed");
                        }
                    }
                }
                Ok(false) => {
                    waiters.push_front(waiter);
                    break;
                }
                Err(e) => {
                    tracing::warn!(resource = %inner.resource, error = %e, "permit hand-over failed");
                    waiters.push_front(waiter);
                    break;
                }
            }
        }
        tracing::debug!(resource = %inner.resource, waiting = waiters.len(), "permit released");
        Ok(())
    }

    pub async fn get_available_permits(&self) -> Result<u32, SemaphoreError> {
        Ok(self
            .inner
            .storage
            .get_available_permits(&self.inner.resource)
            .await?)
    }

    /// Run `f` while holding a permit, releasing afterwards
    pub async fn with_permit<F, Fut, T>(&self, f: F) -> Result<T, SemaphoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await?;
        let output = f().await;
        self.release().await?;
        Ok(output)
    }

    /// Number of live local waiters
    pub async fn waiting(&self) -> usize {
        let waiters = self.inner.waiters.lock().await;
        waiters.iter().filter(|w| !w.is_closed()).count()
    }
}

impl<S: SemaphoreStorage> std::fmt::Debug for DistributedSemaphore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedSemaphore")
            .field("resource", &self.inner.resource)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "semaphore_tests.rs"]
mod tests;
