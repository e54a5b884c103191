//! Queue-based execution stream
//!
//! An [`ExecutionStream`] is a FIFO scheduler with one dedicated worker
//! thread. Callers submit deferred operations and get back a monotonically
//! increasing [`OpId`]; the worker runs them strictly in submission order.
//! Synchronisation is by operation id: `sync_to(id)` blocks until that
//! operation has finished, `sync()` blocks until everything submitted so far
//! has finished.
//!
//! Both the worker's idle wait and the sync wait use a bounded
//! wait-and-recheck loop on a condition variable instead of a single
//! indefinite wait. A lost notification therefore costs at most one poll
//! interval (default 100 µs), never a hang.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{HalError, Result};
use crate::exec::{ExecutionGraph, OpFn, OpId};

/// Default granularity of the worker idle wait and the sync wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_micros(100);

/// Construction-time configuration for an execution stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Diagnostic label carried in log events and the worker thread name.
    /// Has no effect on scheduling.
    pub name: String,

    /// Upper bound on how long the worker idles and how long a `sync`
    /// caller waits between predicate re-checks.
    pub poll_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "stream".into(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// One deferred unit of work, tagged with its submission id.
struct Op {
    id: OpId,
    func: OpFn,
}

/// Queue state shared between producers, sync callers and the worker.
///
/// Everything in here is read and written under the one `Mutex` in
/// [`Shared`]. Operations themselves execute outside the lock.
struct StreamState {
    /// Submitted, not yet executed operations, oldest first.
    pending: VecDeque<Op>,

    /// Id the next submission will receive. Strictly increasing, never
    /// reused.
    next_id: u64,

    /// Number of operations that have finished executing. The most recently
    /// completed id is `completed - 1`; zero means nothing has run yet.
    completed: u64,

    /// Shutdown requested; the worker exits after its current iteration.
    terminate: bool,

    /// Most recent failure observed by the worker. Never cleared.
    last_error: Option<HalError>,
}

struct Shared {
    state: Mutex<StreamState>,
    /// Wakes the worker when a producer deposits work.
    work: Condvar,
    /// Wakes sync callers after each worker iteration.
    done: Condvar,
    poll_timeout: Duration,
    name: String,
}

impl Shared {
    /// Lock the queue state, recovering from poisoning.
    ///
    /// A panicking operation is caught in the worker, so poisoning can only
    /// come from a panic outside any operation; the state itself is always
    /// consistent at lock boundaries.
    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO execution stream with a dedicated worker thread.
///
/// Dropping the stream requests termination, wakes every waiter and joins
/// the worker. Operations still pending at that point are dropped without
/// running.
pub struct ExecutionStream {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("name", &self.shared.name)
            .field("poll_timeout", &self.shared.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl ExecutionStream {
    /// Create a stream with a diagnostic name and default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_config(StreamConfig {
            name: name.into(),
            ..StreamConfig::default()
        })
    }

    /// Create a stream from an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned. This is the
    /// only unrecoverable construction failure; everything after
    /// construction is reported as a `Result` value.
    pub fn with_config(config: StreamConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(StreamState {
                pending: VecDeque::new(),
                next_id: 0,
                completed: 0,
                terminate: false,
                last_error: None,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
            poll_timeout: config.poll_timeout,
            name: config.name,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("fabriq-{}", shared.name))
            .spawn(move || worker_loop(&worker_shared))
            .map_err(HalError::from)?;

        tracing::debug!(stream = %shared.name, "execution stream created");

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Diagnostic name of this stream.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit a boxed operation for deferred execution.
    ///
    /// The id is assigned and the operation appended to the queue tail under
    /// one critical section, so concurrent producers observe a gap-free id
    /// sequence. Never blocks on execution.
    pub fn submit(&self, func: OpFn) -> OpId {
        let id = {
            let mut st = self.shared.lock_state();
            let id = OpId::new(st.next_id);
            st.next_id += 1;
            st.pending.push_back(Op { id, func });
            id
        };

        // Wake the worker in case it was idling on an empty queue.
        self.shared.work.notify_one();
        tracing::trace!(stream = %self.shared.name, id = %id, "operation submitted");
        id
    }

    /// Submit a closure for deferred execution.
    ///
    /// Captured state must be owned or shared (`Send + 'static`); the stream
    /// does not extend the lifetime of anything the closure references.
    pub fn submit_fn<F>(&self, func: F) -> OpId
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.submit(Box::new(func))
    }

    /// Block until every operation submitted strictly before this call has
    /// completed.
    ///
    /// Returns immediately if nothing has been submitted. Success means the
    /// completion point was reached, not that every operation succeeded; use
    /// [`ExecutionStream::last_error`] for failure visibility.
    ///
    /// # Errors
    ///
    /// Currently infallible, kept fallible for parity with
    /// [`ExecutionStream::sync_to`].
    pub fn sync(&self) -> Result<()> {
        let st = self.shared.lock_state();
        if st.next_id == 0 {
            // No pending actions.
            return Ok(());
        }
        let target = st.next_id - 1;
        self.wait_for(st, target)
    }

    /// Block until the operation with the given id has completed.
    ///
    /// Idempotent: an already-completed target returns immediately, as many
    /// times as it is asked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` without blocking if `target` has not been
    /// submitted yet.
    pub fn sync_to(&self, target: OpId) -> Result<()> {
        let st = self.shared.lock_state();
        if target.as_u64() >= st.next_id {
            return Err(HalError::invalid_parameter(format!(
                "operation {target} has not been submitted (next id is {})",
                st.next_id
            )));
        }
        self.wait_for(st, target.as_u64())
    }

    /// Bounded wait-and-recheck until `completed` passes `target`.
    ///
    /// The loop also exits once termination is requested, so a sync caller
    /// cannot hang on a stream that is shutting down.
    fn wait_for(&self, mut st: MutexGuard<'_, StreamState>, target: u64) -> Result<()> {
        while st.completed <= target && !st.terminate {
            let (guard, _timed_out) = self
                .shared
                .done
                .wait_timeout(st, self.shared.poll_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
        }
        Ok(())
    }

    /// Id of the most recently completed operation, if any has run.
    #[must_use]
    pub fn last_completed(&self) -> Option<OpId> {
        let st = self.shared.lock_state();
        st.completed.checked_sub(1).map(OpId::new)
    }

    /// Most recent failure recorded by the worker. Not cleared by reading.
    ///
    /// A successful `sync` only means the stream reached the requested point
    /// in the sequence; operations along the way may still have failed.
    #[must_use]
    pub fn last_error(&self) -> Option<HalError> {
        self.shared.lock_state().last_error.clone()
    }
}

impl ExecutionGraph for ExecutionStream {
    fn submit(&self, func: OpFn) -> OpId {
        ExecutionStream::submit(self, func)
    }

    fn sync(&self) -> Result<()> {
        ExecutionStream::sync(self)
    }

    fn sync_to(&self, target: OpId) -> Result<()> {
        ExecutionStream::sync_to(self, target)
    }

    fn last_completed(&self) -> Option<OpId> {
        ExecutionStream::last_completed(self)
    }

    fn last_error(&self) -> Option<HalError> {
        ExecutionStream::last_error(self)
    }

    fn name(&self) -> &str {
        ExecutionStream::name(self)
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        {
            let mut st = self.shared.lock_state();
            st.terminate = true;
        }
        self.shared.work.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(stream = %self.shared.name, "stream worker panicked");
            }
        }
        tracing::debug!(stream = %self.shared.name, "execution stream destroyed");
    }
}

/// Background execution loop: idle on an empty queue, otherwise pop and run
/// the head operation, then re-check for termination. Every iteration ends
/// by waking sync callers so their predicates get re-checked.
fn worker_loop(shared: &Shared) {
    let mut finished = false;

    while !finished {
        let mut st = shared.lock_state();
        let op = st.pending.pop_front();
        if op.is_none() && !st.terminate {
            let (guard, _timed_out) = shared
                .work
                .wait_timeout(st, shared.poll_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
        }
        drop(st);

        if let Some(op) = op {
            // The operation runs outside the lock: a slow callable stalls
            // later operations in this stream but never `submit` or `sync`
            // callers.
            let outcome = panic::catch_unwind(AssertUnwindSafe(op.func));

            let mut st = shared.lock_state();
            st.completed = op.id.as_u64() + 1;
            match outcome {
                Ok(Ok(())) => {
                    tracing::trace!(stream = %shared.name, id = %op.id, "operation completed");
                }
                Ok(Err(err)) => {
                    // Best-effort policy: record and keep going.
                    tracing::debug!(
                        stream = %shared.name,
                        id = %op.id,
                        error = %err,
                        "operation failed"
                    );
                    st.last_error = Some(err);
                }
                Err(_) => {
                    tracing::warn!(stream = %shared.name, id = %op.id, "operation panicked");
                    st.last_error = Some(HalError::operation_failed(format!(
                        "operation {} panicked",
                        op.id
                    )));
                }
            }
        }

        let mut st = shared.lock_state();
        finished = st.terminate;
        if finished {
            let dropped = st.pending.len();
            if dropped > 0 {
                tracing::debug!(
                    stream = %shared.name,
                    dropped,
                    "dropping pending operations on shutdown"
                );
                st.pending.clear();
            }
        }
        drop(st);

        // The only path by which a blocked sync unblocks before its timeout.
        shared.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ids_are_sequential_from_zero() {
        let stream = ExecutionStream::new("ids").unwrap();
        for expected in 0..10 {
            let id = stream.submit_fn(|| Ok(()));
            assert_eq!(id.as_u64(), expected);
        }
        stream.sync().unwrap();
    }

    #[test]
    fn test_sync_on_fresh_stream_returns_immediately() {
        let stream = ExecutionStream::new("fresh").unwrap();
        stream.sync().unwrap();
        assert_eq!(stream.last_completed(), None);
    }

    #[test]
    fn test_sync_to_unsubmitted_id_is_invalid() {
        let stream = ExecutionStream::new("invalid").unwrap();
        let err = stream.sync_to(OpId::new(100)).unwrap_err();
        assert!(matches!(err, HalError::InvalidParameter { .. }));

        // Still invalid for the very first id before anything is submitted.
        let err = stream.sync_to(OpId::new(0)).unwrap_err();
        assert!(matches!(err, HalError::InvalidParameter { .. }));
    }

    #[test]
    fn test_resync_of_completed_id_is_idempotent() {
        let stream = ExecutionStream::new("resync").unwrap();
        let id = stream.submit_fn(|| Ok(()));
        stream.sync_to(id).unwrap();
        stream.sync_to(id).unwrap();
        stream.sync_to(id).unwrap();
        assert_eq!(stream.last_completed(), Some(id));
    }

    #[test]
    fn test_failed_operation_does_not_stop_the_worker() {
        let stream = ExecutionStream::new("errors").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        stream.submit_fn(|| Err(HalError::transfer_failed("simulated DMA fault")));
        let counter_in_op = Arc::clone(&counter);
        stream.submit_fn(move || {
            counter_in_op.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        stream.sync().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(
            stream.last_error(),
            Some(HalError::TransferFailed { .. })
        ));
    }

    #[test]
    fn test_last_error_is_not_cleared_by_reading() {
        let stream = ExecutionStream::new("sticky").unwrap();
        stream.submit_fn(|| Err(HalError::transfer_failed("boom")));
        stream.sync().unwrap();
        assert!(stream.last_error().is_some());
        assert!(stream.last_error().is_some());
    }

    #[test]
    fn test_panicking_operation_is_recorded_and_survived() {
        let stream = ExecutionStream::new("panics").unwrap();
        stream.submit_fn(|| panic!("bad operation"));
        let id = stream.submit_fn(|| Ok(()));

        stream.sync_to(id).unwrap();
        assert!(matches!(
            stream.last_error(),
            Some(HalError::OperationFailed { .. })
        ));
    }

    #[test]
    fn test_drop_with_pending_work_joins_cleanly() {
        let stream = ExecutionStream::new("drop").unwrap();
        for _ in 0..64 {
            stream.submit_fn(|| {
                std::thread::sleep(Duration::from_millis(1));
                Ok(())
            });
        }
        let start = std::time::Instant::now();
        drop(stream);
        // The worker finishes at most its current operation, then exits.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert_eq!(config.name, "stream");
    }
}
