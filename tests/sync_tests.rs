//! Concurrency tests for the latch, the thin event and per-thread random

use parakit::{CountdownLatch, Result, ThinEvent, ThreadSafeRandom};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_latch_opens_after_concurrent_setters() -> Result<()> {
    for setters in [1usize, 5, 50] {
        let latch = Arc::new(CountdownLatch::new(setters));
        let handles: Vec<_> = (0..setters)
            .map(|_| {
                let latch = latch.clone();
                thread::spawn(move || {
                    latch.set();
                })
            })
            .collect();

        assert!(latch.wait_one_timeout(Duration::from_secs(10))?, "{setters} setters");
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(latch.count(), 0);
        assert!(latch.is_set());
    }
    Ok(())
}

#[test]
fn test_latch_stays_closed_one_short() -> Result<()> {
    let latch = CountdownLatch::new(5);
    for _ in 0..4 {
        latch.set();
    }
    assert!(!latch.wait_one_timeout(Duration::from_millis(20))?);
    assert_eq!(latch.set(), 0);
    latch.wait_one()
}

#[test]
fn test_thin_event_randomized_interleavings() {
    const WAITERS: usize = 4;

    for _ in 0..200 {
        let event = Arc::new(ThinEvent::new(false));
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..WAITERS {
            let event = event.clone();
            let done_tx = done_tx.clone();
            let delay = ThreadSafeRandom::next_range(0..200);
            thread::spawn(move || {
                thread::sleep(Duration::from_micros(delay));
                event.wait();
                let _ = done_tx.send(());
            });
        }

        let setter_delay = ThreadSafeRandom::next_range(0..200);
        thread::sleep(Duration::from_micros(setter_delay));
        let set_at = Instant::now();
        event.set();

        // A lost wakeup leaves a waiter blocked forever; the deadline turns
        // that into a failure instead of a hang.
        let deadline = set_at + Duration::from_secs(5);
        for _ in 0..WAITERS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(done_rx.recv_timeout(remaining).is_ok(), "waiter stranded");
        }
        assert!(set_at.elapsed() < Duration::from_secs(5));
    }
}

#[test]
fn test_thin_event_many_waiters_one_set() {
    let event = Arc::new(ThinEvent::new(false));
    let waiters: Vec<_> = (0..16)
        .map(|_| {
            let event = event.clone();
            thread::spawn(move || event.wait())
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    event.set();
    for waiter in waiters {
        waiter.join().unwrap();
    }
}

#[test]
fn test_random_sequences_differ_between_threads() {
    let draw = || (0..1000).map(|_| ThreadSafeRandom::next_u32()).collect::<Vec<_>>();
    let first = thread::spawn(draw);
    let second = thread::spawn(draw);

    let first = first.join().unwrap();
    let second = second.join().unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_latch_releases_blocked_waiters() {
    let latch = Arc::new(CountdownLatch::new(3));
    let (done_tx, done_rx) = mpsc::channel();
    for _ in 0..4 {
        let latch = latch.clone();
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let _ = done_tx.send(latch.wait_one());
        });
    }

    thread::sleep(Duration::from_millis(20));
    for _ in 0..3 {
        latch.set();
    }
    for _ in 0..4 {
        let outcome = done_rx.recv_timeout(Duration::from_secs(5));
        assert!(matches!(outcome, Ok(Ok(()))));
    }
}
