//! Device buffer facade
//!
//! A [`DeviceBuffer`] pairs a host-side staging area with a device-visible
//! window. Host code edits the staging side with [`DeviceBuffer::write_from`]
//! / [`DeviceBuffer::read_into`]; [`DeviceBuffer::sync`] moves bytes across
//! the boundary in the requested direction. Typed access goes through
//! [`DeviceBufferExt`], which casts plain-old-data slices with `bytemuck`
//! instead of raw pointer casts.

use bytemuck::Pod;

use crate::error::{HalError, Result};

/// Direction of a host/device synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Push host staging bytes to the device.
    HostToDevice,
    /// Pull device bytes into host staging.
    DeviceToHost,
}

/// Kind of memory backing a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// DIMM-backed memory reachable from both sides.
    Dual,
    /// Cache-coherent allocation.
    Cacheable,
    /// Host-only memory.
    Host,
    /// Device-only memory.
    Device,
}

/// One allocated buffer, shared between host code and data movers.
pub trait DeviceBuffer: Send + Sync {
    /// Buffer size in bytes.
    fn len(&self) -> usize;

    /// True when the buffer holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Device-visible address, if the backing memory has one.
    fn device_addr(&self) -> Option<u64>;

    /// Copy `data` into host staging at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the range falls outside the buffer.
    fn write_from(&self, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy host staging bytes at `offset` into `out`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the range falls outside the buffer.
    fn read_into(&self, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Move bytes between host staging and the device window.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying transfer fails.
    fn sync(&self, direction: SyncDirection) -> Result<()>;
}

/// Typed staging access for plain-old-data element types.
pub trait DeviceBufferExt: DeviceBuffer {
    /// Write a typed slice into host staging at a byte offset.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the range falls outside the buffer.
    fn write_pod<T: Pod>(&self, offset: usize, data: &[T]) -> Result<()> {
        self.write_from(offset, bytemuck::cast_slice(data))
    }

    /// Read host staging bytes at a byte offset into a typed slice.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the range falls outside the buffer.
    fn read_pod<T: Pod>(&self, offset: usize, out: &mut [T]) -> Result<()> {
        self.read_into(offset, bytemuck::cast_slice_mut(out))
    }
}

impl<B: DeviceBuffer + ?Sized> DeviceBufferExt for B {}

/// Validate that `offset + len` stays inside a buffer of `size` bytes.
pub(crate) fn check_range(size: usize, offset: usize, len: usize) -> Result<()> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| HalError::invalid_parameter("buffer range overflows"))?;
    if end > size {
        return Err(HalError::invalid_parameter(format!(
            "range {offset}..{end} exceeds buffer size {size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range() {
        check_range(16, 0, 16).unwrap();
        check_range(16, 8, 8).unwrap();
        assert!(check_range(16, 8, 9).is_err());
        assert!(check_range(16, usize::MAX, 2).is_err());
    }
}
