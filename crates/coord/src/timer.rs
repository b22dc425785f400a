// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellable background timers
//!
//! Every periodic activity (lease heartbeat, election timeout, leader heartbeat,
//! expiry sweep) runs as a [`Ticker`]: a spawned task paired with a
//! cancellation token. Cancelling the token stops the loop before its next
//! tick; a tick already in flight finishes, so tick bodies must re-check
//! [`Ticker::is_cancelled`]-equivalent state before mutating anything.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running background timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct Ticker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a timer that waits `period()` before every call to `tick`.
    ///
    /// `period` is re-evaluated each round, which lets callers add jitter.
    /// The loop ends when the ticker is cancelled or `tick` returns
    /// [`ControlFlow::Break`]. The tick receives the ticker's token so it can
    /// detect a cancellation that raced with its own work.
    pub fn spawn<P, F, Fut>(mut period: P, mut tick: F) -> Self
    where
        P: FnMut() -> Duration + Send + 'static,
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                let delay = period();
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                if token.is_cancelled() {
                    break;
                }
                if tick(token.clone()).await.is_break() {
                    break;
                }
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Spawn a timer with a fixed period
    pub fn every<F, Fut>(period: Duration, tick: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send,
    {
        Self::spawn(move || period, tick)
    }

    /// A token that is cancelled together with this ticker
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the timer loop has exited (cancelled or broke out)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Stop the timer. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the timer and wait for an in-flight tick to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "timer task panicked");
                }
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
