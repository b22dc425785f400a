// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn counting_ticker(period: Duration) -> (Ticker, Arc<AtomicU32>) {
    let count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&count);
    let ticker = Ticker::every(period, move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        }
    });
    (ticker, count)
}

#[tokio::test(start_paused = true)]
async fn ticks_once_per_period() {
    let (ticker, count) = counting_ticker(Duration::from_secs(5));

    tokio::time::sleep(Duration::from_millis(15_500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 3);

    ticker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_future_ticks() {
    let (ticker, count) = counting_ticker(Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    ticker.cancel();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(ticker.is_cancelled());
    assert!(ticker.is_finished());
}

#[tokio::test(start_paused = true)]
async fn drop_cancels_the_timer() {
    let (ticker, count) = counting_ticker(Duration::from_secs(1));
    let token = ticker.token();
    drop(ticker);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(token.is_cancelled());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn break_ends_the_loop() {
    let count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&count);
    let ticker = Ticker::every(Duration::from_secs(1), move |_| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(ticker.is_finished());
}

#[tokio::test(start_paused = true)]
async fn period_is_reevaluated_each_round() {
    let periods = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&periods);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let start = tokio::time::Instant::now();

    let ticker = Ticker::spawn(
        move || Duration::from_secs(u64::from(seen.fetch_add(1, Ordering::SeqCst) + 1)),
        move |_| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(start.elapsed());
                ControlFlow::Continue(())
            }
        },
    );

    for expected in [1, 3, 6] {
        let elapsed = rx.recv().await.map(|d| d.as_secs());
        assert_eq!(elapsed, Some(expected));
    }
    ticker.shutdown().await;
}
