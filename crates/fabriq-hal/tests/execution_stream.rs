//! Concurrency and ordering tests for the execution stream.
//!
//! Everything here runs without hardware: operations are plain closures
//! observed through shared state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use fabriq_hal::exec::{ExecutionGraph, ExecutionGraphExt, ExecutionStream, OpId};
use fabriq_hal::HalError;

#[test]
fn test_fifo_submission_order() {
    let stream = ExecutionStream::new("fifo").unwrap();
    let next_expected = Arc::new(AtomicUsize::new(0));

    for index in 0..200 {
        let next = Arc::clone(&next_expected);
        stream.submit_fn(move || {
            let seen = next.fetch_add(1, Ordering::SeqCst);
            if seen == index {
                Ok(())
            } else {
                Err(HalError::operation_failed(format!(
                    "ran out of order: expected slot {index}, got {seen}"
                )))
            }
        });
    }

    stream.sync().unwrap();
    assert_eq!(next_expected.load(Ordering::SeqCst), 200);
    assert!(stream.last_error().is_none(), "an operation ran out of order");
}

#[test]
fn test_at_most_one_operation_runs_at_a_time() {
    let stream = ExecutionStream::new("exclusive").unwrap();
    let intervals = Arc::new(Mutex::new(Vec::<(Instant, Instant)>::new()));

    for _ in 0..32 {
        let intervals = Arc::clone(&intervals);
        stream.submit_fn(move || {
            let enter = Instant::now();
            thread::sleep(Duration::from_micros(200));
            intervals.lock().unwrap().push((enter, Instant::now()));
            Ok(())
        });
    }

    stream.sync().unwrap();

    let intervals = intervals.lock().unwrap();
    assert_eq!(intervals.len(), 32);
    for pair in intervals.windows(2) {
        let (_, prev_exit) = pair[0];
        let (next_enter, _) = pair[1];
        assert!(
            prev_exit <= next_enter,
            "two operations overlapped in time"
        );
    }
}

#[test]
fn test_sync_to_waits_for_exactly_the_target() {
    let stream = ExecutionStream::new("targeted").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));

    for index in 0u64..3 {
        let log = Arc::clone(&log);
        stream.submit_fn(move || {
            log.lock().unwrap().push(index);
            Ok(())
        });
    }

    // Operation 3 blocks until we say so, gating operation 4 behind it.
    let gate = Arc::clone(&release_rx);
    stream.submit_fn(move || {
        gate.lock().unwrap().recv().ok();
        Ok(())
    });
    let tail_log = Arc::clone(&log);
    let tail = stream.submit_fn(move || {
        tail_log.lock().unwrap().push(4);
        Ok(())
    });

    // Syncing to op 2 must not require the gated op to run.
    stream.sync_to(OpId::new(2)).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);

    release_tx.send(()).unwrap();
    stream.sync_to(tail).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 4]);
}

#[test]
fn test_sync_drains_everything_submitted_so_far() {
    let stream = ExecutionStream::new("drain").unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let counter = Arc::clone(&counter);
        stream.submit_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    stream.sync().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 50);
    assert_eq!(stream.last_completed(), Some(OpId::new(49)));
}

#[test]
fn test_sync_to_unknown_id_fails_without_blocking() {
    let stream = ExecutionStream::new("bounds").unwrap();
    stream.submit_fn(|| Ok(()));

    let started = Instant::now();
    let err = stream.sync_to(OpId::new(1_000)).unwrap_err();
    assert!(matches!(err, HalError::InvalidParameter { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_resync_to_completed_id_is_idempotent() {
    let stream = ExecutionStream::new("resync").unwrap();
    let id = stream.submit_fn(|| Ok(()));

    for _ in 0..3 {
        stream.sync_to(id).unwrap();
    }
    stream.sync().unwrap();
    stream.sync().unwrap();
}

#[test]
fn test_failed_operation_does_not_stop_the_stream() {
    let stream = ExecutionStream::new("faulty").unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let before = Arc::clone(&counter);
    stream.submit_fn(move || {
        before.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    stream.submit_fn(|| Err(HalError::transfer_failed("simulated fault")));
    let after = Arc::clone(&counter);
    stream.submit_fn(move || {
        after.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    stream.sync().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(matches!(
        stream.last_error(),
        Some(HalError::TransferFailed { .. })
    ));

    // The recorded fault stays visible after later successes.
    stream.submit_fn(|| Ok(()));
    stream.sync().unwrap();
    assert!(stream.last_error().is_some());
}

#[test]
fn test_drop_with_pending_work_joins_promptly() {
    let (tx, rx) = mpsc::channel::<()>();
    let started = Instant::now();
    {
        let stream = ExecutionStream::new("shutdown").unwrap();
        stream.submit_fn(move || {
            tx.send(()).ok();
            thread::sleep(Duration::from_millis(20));
            Ok(())
        });
        for _ in 0..100 {
            stream.submit_fn(|| {
                thread::sleep(Duration::from_millis(20));
                Ok(())
            });
        }
        // Make sure the first op is actually running before dropping.
        rx.recv().unwrap();
    }
    // Pending work is discarded; only the in-flight op had to finish.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_concurrent_producers_get_unique_gap_free_ids() {
    let graph: Arc<dyn ExecutionGraph> = Arc::new(ExecutionStream::new("shared").unwrap());
    let counter = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for _ in 0..8 {
        let graph = Arc::clone(&graph);
        let counter = Arc::clone(&counter);
        producers.push(thread::spawn(move || {
            let mut ids = Vec::with_capacity(100);
            for _ in 0..100 {
                let counter = Arc::clone(&counter);
                ids.push(graph.submit_op(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }));
            }
            ids
        }));
    }

    let mut all_ids: Vec<u64> = producers
        .into_iter()
        .flat_map(|p| p.join().unwrap())
        .map(|id| id.as_u64())
        .collect();

    graph.sync().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 800);

    all_ids.sort_unstable();
    let expected: Vec<u64> = (0..800).collect();
    assert_eq!(all_ids, expected, "ids must be unique and gap-free from 0");
}
