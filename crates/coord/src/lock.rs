// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed lock for exclusive resource access
//!
//! A holder owns a resource through a time-bounded [`LockLease`] kept alive by
//! a heartbeat. Storage is authoritative: a failed extend means the lease is
//! gone, whatever this process believes.

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, LockError, StorageError};
use crate::events::{EventHub, EventReceiver, NamedEvent};
use crate::lease::{HolderId, LockLease};
use crate::storage::LockStorage;
use crate::timer::Ticker;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Wake, Waker};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lock configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease lifetime; also the basis of the default retry budget
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Wait between acquisition attempts, and the bound on each attempt
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Attempt budget; `timeout / retry_interval` when unset
    pub max_retries: Option<u32>,
    /// How often a held lease is extended
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Release a still-held lease when the last handle is dropped, including
    /// when that happens as `main` returns. Binding release to SIGINT/SIGTERM
    /// is explicit, see [`DistributedLock::release_on_shutdown`].
    pub auto_release_on_exit: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(1000),
            max_retries: None,
            heartbeat_interval: Duration::from_secs(5),
            auto_release_on_exit: true,
        }
    }
}

impl LockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_auto_release_on_exit(mut self, enabled: bool) -> Self {
        self.auto_release_on_exit = enabled;
        self
    }

    /// Number of acquisition attempts before giving up (at least one)
    pub fn retry_budget(&self) -> u32 {
        let budget = self.max_retries.unwrap_or_else(|| {
            let interval = self.retry_interval.as_millis().max(1);
            u32::try_from(self.timeout.as_millis() / interval).unwrap_or(u32::MAX)
        });
        budget.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "lock.timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "lock.retry_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.timeout {
            return Err(ConfigError::Invalid {
                field: "lock.heartbeat_interval",
                reason: format!(
                    "must be non-zero and shorter than the lease timeout ({})",
                    humantime::format_duration(self.timeout)
                ),
            });
        }
        Ok(())
    }
}

/// Lifecycle events emitted by a [`DistributedLock`]
#[derive(Clone, Debug, PartialEq)]
pub enum LockEvent {
    Acquired { lease: LockLease },
    Released { lease: LockLease },
    Heartbeat { lease: LockLease },
    /// Storage no longer recognises the lease; privileged work must stop
    Lost { lease: LockLease, reason: String },
    Error { resource: String, message: String },
}

impl NamedEvent for LockEvent {
    fn name(&self) -> &'static str {
        match self {
            LockEvent::Acquired { .. } => "acquired",
            LockEvent::Released { .. } => "released",
            LockEvent::Heartbeat { .. } => "heartbeat",
            LockEvent::Lost { .. } => "lost",
            LockEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Default)]
struct LockSlot {
    lease: Option<LockLease>,
    heartbeat: Option<Ticker>,
    acquiring: bool,
    /// Runtime the lease was acquired on; used to release it on drop
    runtime: Option<tokio::runtime::Handle>,
}

struct LockInner<S: LockStorage, C: Clock> {
    resource: String,
    holder_id: HolderId,
    config: LockConfig,
    storage: Arc<S>,
    clock: C,
    events: EventHub<LockEvent>,
    slot: Mutex<LockSlot>,
    /// Serializes extend calls between the heartbeat and `renew`
    extend_gate: tokio::sync::Mutex<()>,
    /// Cancelled when the last handle goes away; ends `release_on` watchers
    closed: CancellationToken,
}

/// A named mutual-exclusion lease over shared [`LockStorage`]
///
/// Cloning yields another handle to the same lock.
pub struct DistributedLock<S: LockStorage, C: Clock = SystemClock> {
    inner: Arc<LockInner<S, C>>,
}

impl<S: LockStorage, C: Clock> Clone for DistributedLock<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: LockStorage> DistributedLock<S, SystemClock> {
    /// Create a lock with a freshly generated holder id
    pub fn new(resource: impl Into<String>, storage: S, config: LockConfig) -> Self {
        Self::with_clock(resource, HolderId::generate(), storage, config, SystemClock)
    }
}

impl<S: LockStorage, C: Clock> DistributedLock<S, C> {
    pub fn with_clock(
        resource: impl Into<String>,
        holder_id: HolderId,
        storage: S,
        config: LockConfig,
        clock: C,
    ) -> Self {
        Self {
            inner: Arc::new(LockInner {
                resource: resource.into(),
                holder_id,
                config,
                storage: Arc::new(storage),
                clock,
                events: EventHub::new(),
                slot: Mutex::new(LockSlot::default()),
                extend_gate: tokio::sync::Mutex::new(()),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn holder_id(&self) -> &HolderId {
        &self.inner.holder_id
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Whether this instance currently believes it holds the lease
    pub fn is_held(&self) -> bool {
        self.inner.slot().lease.is_some()
    }

    /// Snapshot of the held lease
    pub fn lease(&self) -> Option<LockLease> {
        self.inner.slot().lease.clone()
    }

    /// Whether a heartbeat timer is currently scheduled
    pub fn is_heartbeating(&self) -> bool {
        self.inner
            .slot()
            .heartbeat
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> EventReceiver<LockEvent> {
        self.inner.events.subscribe()
    }

    /// Acquire the lock, retrying until the attempt budget is spent
    pub async fn acquire(&self) -> Result<LockLease, LockError> {
        self.acquire_with_cancel(CancellationToken::new()).await
    }

    /// Acquire the lock, giving up early when `cancel` fires
    pub async fn acquire_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<LockLease, LockError> {
        let inner = &self.inner;
        let _acquiring = AcquireGuard::begin(inner)?;
        let budget = inner.config.retry_budget();
        let mut last_error: Option<StorageError> = None;

        tracing::debug!(
            resource = %inner.resource,
            holder = %inner.holder_id,
            budget,
            retry_interval = %humantime::format_duration(inner.config.retry_interval),
            "acquiring lock"
        );

        for attempt in 1..=budget {
            let lease = LockLease::new(
                inner.resource.clone(),
                inner.holder_id.clone(),
                inner.clock.now(),
                inner.config.timeout,
            );

            let outcome = tokio::select! {
                () = cancel.cancelled() => {
                    inner.abandon(lease);
                    return Err(LockError::Cancelled(inner.resource.clone()));
                }
                r = tokio::time::timeout(inner.config.retry_interval, inner.storage.acquire_lock(&lease)) => r,
            };

            match outcome {
                Ok(Ok(true)) => return Ok(inner.on_acquired(lease)),
                Ok(Ok(false)) => {
                    tracing::debug!(resource = %inner.resource, attempt, "lock held elsewhere");
                    last_error = None;
                }
                Ok(Err(e)) => {
                    tracing::warn!(resource = %inner.resource, attempt, error = %e, "acquire attempt failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::warn!(resource = %inner.resource, attempt, "acquire attempt timed out");
                    inner.abandon(lease);
                    last_error = Some(StorageError::TimedOut(format!(
                        "acquire_lock on {}",
                        inner.resource
                    )));
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(LockError::Cancelled(inner.resource.clone())),
                () = tokio::time::sleep(inner.config.retry_interval) => {}
            }
        }

        Err(match last_error {
            Some(source) => LockError::Storage {
                resource: inner.resource.clone(),
                attempts: budget,
                source,
            },
            None => LockError::Timeout {
                resource: inner.resource.clone(),
                attempts: budget,
            },
        })
    }

    /// Release the lock. A no-op when not held; never fails.
    ///
    /// Local state is cleared even if storage rejects the release; the
    /// storage error is published as [`LockEvent::Error`].
    pub async fn release(&self) {
        let inner = &self.inner;
        let (lease, heartbeat) = {
            let mut slot = inner.slot();
            (slot.lease.take(), slot.heartbeat.take())
        };
        if let Some(heartbeat) = heartbeat {
            heartbeat.cancel();
        }
        let Some(lease) = lease else {
            return;
        };

        match inner.storage.release_lock(&lease).await {
            Ok(()) => tracing::info!(
                resource = %lease.resource,
                lease_id = %lease.lease_id,
                "lock released"
            ),
            Err(e) => {
                tracing::error!(resource = %lease.resource, error = %e, "release failed");
                inner.events.publish(LockEvent::Error {
                    resource: lease.resource.clone(),
                    message: e.to_string(),
                });
            }
        }
        inner.events.publish(LockEvent::Released { lease });
    }

    /// Extend the held lease now, outside the heartbeat schedule
    pub async fn renew(&self) -> Result<LockLease, LockError> {
        let inner = &self.inner;
        let _gate = inner.extend_gate.lock().await;
        let current = inner
            .slot()
            .lease
            .clone()
            .ok_or_else(|| LockError::Released(inner.resource.clone()))?;

        let renewed = current.renewed(inner.clock.now(), inner.config.timeout);
        match inner.storage.extend_lock(&renewed).await {
            Ok(()) => {
                if inner.store_renewed(&renewed) {
                    Ok(renewed)
                } else {
                    Err(LockError::Released(inner.resource.clone()))
                }
            }
            Err(e) => {
                inner.mark_lost(&current, &e);
                Err(match e {
                    StorageError::LeaseExpired { resource, lease_id } => {
                        LockError::Expired { resource, lease_id }
                    }
                    StorageError::LeaseMismatch { resource, .. } => LockError::Released(resource),
                    source => LockError::Storage {
                        resource: inner.resource.clone(),
                        attempts: 1,
                        source,
                    },
                })
            }
        }
    }

    /// Run `f` while holding the lock, releasing afterwards
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T, LockError>
    where
        F: FnOnce(LockLease) -> Fut,
        Fut: Future<Output = T>,
    {
        let lease = self.acquire().await?;
        let output = f(lease).await;
        self.release().await;
        Ok(output)
    }

    /// Release the lock when `signal` completes
    ///
    /// Intended for the embedding application's shutdown future (SIGTERM,
    /// Ctrl-C, a daemon stop request). The watcher ends quietly once every
    /// handle to this lock has been dropped.
    pub fn release_on<F>(&self, signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let weak: Weak<LockInner<S, C>> = Arc::downgrade(&self.inner);
        let closed = self.inner.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = closed.cancelled() => {}
                () = signal => {
                    if let Some(inner) = weak.upgrade() {
                        tracing::info!(resource = %inner.resource, "shutdown signal, releasing lock");
                        DistributedLock { inner }.release().await;
                    }
                }
            }
        });
    }

    /// Release the lock on SIGINT or SIGTERM
    ///
    /// This installs tokio signal handlers, which replace the default
    /// terminate-on-signal behaviour; the application still decides when to
    /// exit.
    pub fn release_on_shutdown(&self) {
        self.release_on(shutdown_signal());
    }
}

/// Resolves on the first SIGINT or SIGTERM (Ctrl-C on other platforms)
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "signal registration failed, falling back to ctrl-c");
            }
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signals");
        std::future::pending::<()>().await;
    }
}

impl<S: LockStorage, C: Clock> LockInner<S, C> {
    fn slot(&self) -> std::sync::MutexGuard<'_, LockSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_acquired(self: &Arc<Self>, lease: LockLease) -> LockLease {
        let heartbeat = self.spawn_heartbeat();
        {
            let mut slot = self.slot();
            slot.lease = Some(lease.clone());
            slot.heartbeat = Some(heartbeat);
            slot.runtime = tokio::runtime::Handle::try_current().ok();
        }

        tracing::info!(
            resource = %lease.resource,
            holder = %lease.holder_id,
            lease_id = %lease.lease_id,
            expires_at = %lease.expires_at,
            "lock acquired"
        );
        self.events.publish(LockEvent::Acquired {
            lease: lease.clone(),
        });
        lease
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> Ticker {
        let weak = Arc::downgrade(self);
        Ticker::every(self.config.heartbeat_interval, move |token| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.heartbeat(&token).await,
                    None => ControlFlow::Break(()),
                }
            }
        })
    }

    /// One heartbeat round. Breaks the loop once the lease is gone.
    async fn heartbeat(&self, token: &CancellationToken) -> ControlFlow<()> {
        let _gate = self.extend_gate.lock().await;
        let held = self.slot().lease.clone();
        let Some(current) = held else {
            return ControlFlow::Break(());
        };

        let now = self.clock.now();
        let renewed = current.renewed(now, self.config.timeout);
        // An extend that has not answered by the time the lease runs out has
        // lost the lease either way.
        let result = match tokio::time::timeout(
            current.remaining(now),
            self.storage.extend_lock(&renewed),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::TimedOut(format!(
                "extend_lock on {}",
                current.resource
            ))),
        };

        if token.is_cancelled() {
            return ControlFlow::Break(());
        }

        match result {
            Ok(()) => {
                if self.store_renewed(&renewed) {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
            Err(e) => {
                let transient = !matches!(
                    e,
                    StorageError::LeaseMismatch { .. } | StorageError::LeaseExpired { .. }
                );
                if self.mark_lost(&current, &e) && transient {
                    self.events.publish(LockEvent::Error {
                        resource: current.resource.clone(),
                        message: e.to_string(),
                    });
                }
                ControlFlow::Break(())
            }
        }
    }

    /// Record a successful extend, unless the lease was released meanwhile
    fn store_renewed(&self, renewed: &LockLease) -> bool {
        {
            let mut slot = self.slot();
            match &slot.lease {
                Some(held) if held.same_lease(renewed) => slot.lease = Some(renewed.clone()),
                _ => return false,
            }
        }
        tracing::debug!(
            resource = %renewed.resource,
            expires_at = %renewed.expires_at,
            "lock heartbeat"
        );
        self.events.publish(LockEvent::Heartbeat {
            lease: renewed.clone(),
        });
        true
    }

    /// Drop local ownership of `lease` after storage rejected it. Returns
    /// false if it was no longer held.
    fn mark_lost(&self, lease: &LockLease, error: &StorageError) -> bool {
        let heartbeat = {
            let mut slot = self.slot();
            if !slot.lease.as_ref().is_some_and(|held| held.same_lease(lease)) {
                return false;
            }
            slot.lease = None;
            slot.heartbeat.take()
        };
        if let Some(heartbeat) = heartbeat {
            heartbeat.cancel();
        }

        tracing::warn!(
            resource = %lease.resource,
            lease_id = %lease.lease_id,
            error = %error,
            "lock lost"
        );
        self.events.publish(LockEvent::Lost {
            lease: lease.clone(),
            reason: error.to_string(),
        });
        true
    }

    /// Best-effort release of a candidate lease whose outcome is unknown
    fn abandon(&self, lease: LockLease) {
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move {
            if let Err(e) = storage.release_lock(&lease).await {
                tracing::debug!(resource = %lease.resource, error = %e, "abandoned lease cleanup failed");
            }
        });
    }
}

impl<S: LockStorage, C: Clock> Drop for LockInner<S, C> {
    fn drop(&mut self) {
        self.closed.cancel();
        let slot = self.slot.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(heartbeat) = slot.heartbeat.take() {
            heartbeat.cancel();
        }
        let (Some(lease), acquired_on) = (slot.lease.take(), slot.runtime.take()) else {
            return;
        };
        if !self.config.auto_release_on_exit {
            return;
        }
        let Some(runtime) = tokio::runtime::Handle::try_current().ok().or(acquired_on) else {
            tracing::warn!(resource = %lease.resource, "no runtime to release dropped lock");
            return;
        };

        let storage = Arc::clone(&self.storage);
        let mut release = Box::pin(async move {
            match storage.release_lock(&lease).await {
                Ok(()) => tracing::info!(resource = %lease.resource, "lock released on drop"),
                Err(e) => {
                    tracing::error!(resource = %lease.resource, error = %e, "release on drop failed")
                }
            }
        });

        // A backend that answers without waiting finishes here, before the
        // runtime gets a chance to shut down and discard the task
        let _context = runtime.enter();
        let waker = Waker::from(Arc::new(InlineWake));
        if release
            .as_mut()
            .poll(&mut Context::from_waker(&waker))
            .is_pending()
        {
            runtime.spawn(release);
        }
    }
}

/// Waker for the single inline poll in `Drop`; a pending release is re-polled
/// by the runtime with its own waker
struct InlineWake;

impl Wake for InlineWake {
    fn wake(self: Arc<Self>) {}
}

/// Marks an acquisition in flight; rejects re-entrant acquires
struct AcquireGuard<'a, S: LockStorage, C: Clock> {
    inner: &'a LockInner<S, C>,
}

impl<'a, S: LockStorage, C: Clock> AcquireGuard<'a, S, C> {
    fn begin(inner: &'a LockInner<S, C>) -> Result<Self, LockError> {
        let mut slot = inner.slot();
        if slot.lease.is_some() || slot.acquiring {
            return Err(LockError::Held(inner.resource.clone()));
        }
        slot.acquiring = true;
        Ok(Self { inner })
    }
}

impl<S: LockStorage, C: Clock> Drop for AcquireGuard<'_, S, C> {
    fn drop(&mut self) {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .acquiring = false;
    }
}

impl<S: LockStorage, C: Clock> std::fmt::Debug for DistributedLock<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("resource", &self.inner.resource)
            .field("holder_id", &self.inner.holder_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
