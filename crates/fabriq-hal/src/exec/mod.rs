//! Asynchronous execution graphs
//!
//! Lets register writes, buffer transfers and accelerator start/stop/sync
//! calls be deferred and run on a background worker instead of blocking the
//! caller. The only implementation today is the queue-based
//! [`ExecutionStream`] (same idea as a CUDA stream): strict FIFO, one worker
//! per stream, synchronisation points addressed by operation id.
//!
//! A dependency-graph scheduler, where an operation can wait on several
//! predecessors, is planned but not implemented; asking for it via
//! [`GraphKind::Dag`] yields `NotImplemented`.

use std::sync::Arc;

use crate::error::{HalError, Result};

pub mod queued;
mod stream;

pub use queued::{QueuedAccelerator, QueuedBuffer, QueuedDataMover};
pub use stream::{ExecutionStream, StreamConfig, DEFAULT_POLL_TIMEOUT};

/// Identifier of a submitted operation, unique within one graph instance.
///
/// Assigned at submission time, starting at 0 and strictly increasing.
/// Doubles as a synchronisation point for [`ExecutionGraph::sync_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u64);

impl OpId {
    /// Wrap a raw id value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deferred unit of work.
///
/// Captured state must be owned or shared; the graph does not copy or extend
/// the lifetime of anything the callable references, and the `'static`
/// bound makes that contract explicit at submission time.
pub type OpFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Common contract of all execution graph flavours.
///
/// Implementations schedule submitted operations on their own worker; the
/// graph depends only on the "callable returning `Result`" capability and
/// never on which platform produced the callable.
pub trait ExecutionGraph: Send + Sync {
    /// Submit a boxed operation, returning its assigned id. Fire-and-forget:
    /// never blocks on execution.
    fn submit(&self, func: OpFn) -> OpId;

    /// Block until everything submitted strictly before this call has
    /// completed.
    ///
    /// # Errors
    ///
    /// Implementation-specific; the stream implementation is infallible
    /// here.
    fn sync(&self) -> Result<()>;

    /// Block until the given operation has completed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the id has not been submitted yet.
    fn sync_to(&self, target: OpId) -> Result<()>;

    /// Id of the most recently completed operation, if any has run.
    fn last_completed(&self) -> Option<OpId>;

    /// Most recent failure observed while executing operations. Reading
    /// does not clear it.
    fn last_error(&self) -> Option<HalError>;

    /// Diagnostic name of this graph.
    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGraph")
            .field("name", &self.name())
            .finish()
    }
}

/// Closure-submission sugar available on any graph, trait object included.
pub trait ExecutionGraphExt: ExecutionGraph {
    /// Submit a closure for deferred execution.
    fn submit_op<F>(&self, func: F) -> OpId
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.submit(Box::new(func))
    }
}

impl<G: ExecutionGraph + ?Sized> ExecutionGraphExt for G {}

/// Execution graph flavour selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    /// Queue-based graph: strict FIFO with a single worker.
    Stream,

    /// Dependency graph with multiple predecessors per operation. Reserved;
    /// not implemented.
    Dag,
}

/// Construct an execution graph of the requested flavour.
///
/// # Errors
///
/// Returns `NotImplemented` for [`GraphKind::Dag`], or an error if the
/// worker thread cannot be spawned.
pub fn create_graph(kind: GraphKind, config: StreamConfig) -> Result<Arc<dyn ExecutionGraph>> {
    match kind {
        GraphKind::Stream => {
            let stream = ExecutionStream::with_config(config)?;
            Ok(Arc::new(stream))
        }
        GraphKind::Dag => Err(HalError::not_implemented(
            "dependency-graph execution (only stream graphs are available)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stream_graph() {
        let graph = create_graph(GraphKind::Stream, StreamConfig::default()).unwrap();
        let id = graph.submit_op(|| Ok(()));
        graph.sync_to(id).unwrap();
        assert_eq!(graph.last_completed(), Some(id));
    }

    #[test]
    fn test_dag_graphs_are_not_implemented() {
        let err = create_graph(GraphKind::Dag, StreamConfig::default()).unwrap_err();
        assert!(matches!(err, HalError::NotImplemented { .. }));
    }

    #[test]
    fn test_op_id_ordering() {
        assert!(OpId::new(0) < OpId::new(1));
        assert_eq!(OpId::new(7).as_u64(), 7);
        assert_eq!(OpId::new(7).to_string(), "7");
    }
}
