//! Data mover facade
//!
//! Allocates device buffers and moves their contents between host and
//! device. On the memory-mapped fabric this drives a DMA engine's register
//! pairs; on kernel-device cards the char device performs the transfer.
//! Deferred variants that run on an execution stream are provided by
//! [`crate::exec::QueuedDataMover`].

use std::sync::Arc;

use crate::accelerator::DeviceState;
use crate::error::Result;
use crate::memory::{DeviceBuffer, MemoryKind, SyncDirection};

/// Whether a transfer call returns after queueing or after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Return once the transfer has completed.
    Blocking,
    /// Kick the transfer off and return; complete it later with
    /// [`DataMover::flush`].
    Deferred,
}

/// Buffer allocation and host/device transfer engine.
pub trait DataMover: Send + Sync {
    /// Allocate a device buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the device memory window is exhausted or the
    /// allocation fails.
    fn alloc(&self, size: usize, kind: MemoryKind) -> Result<Arc<dyn DeviceBuffer>>;

    /// Move `size` bytes at `offset` from the buffer's host side to the
    /// device.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the range falls outside the buffer, or
    /// an error if the transfer fails.
    fn upload(
        &self,
        buffer: &Arc<dyn DeviceBuffer>,
        size: usize,
        offset: usize,
        mode: ExecMode,
    ) -> Result<()>;

    /// Move `size` bytes at `offset` from the device to the buffer's host
    /// side.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the range falls outside the buffer, or
    /// an error if the transfer fails.
    fn download(
        &self,
        buffer: &Arc<dyn DeviceBuffer>,
        size: usize,
        offset: usize,
        mode: ExecMode,
    ) -> Result<()>;

    /// Complete outstanding deferred transfers in one direction.
    ///
    /// # Errors
    ///
    /// Returns an error if an outstanding transfer failed or timed out.
    fn flush(&self, direction: SyncDirection) -> Result<()>;

    /// Transfer-engine state.
    fn status(&self) -> DeviceState;
}
