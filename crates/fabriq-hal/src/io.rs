//! Positioned I/O on device nodes
//!
//! Kernel-driver cards expose registers and DMA windows through a char
//! device; everything here is `pread`/`pwrite` at an absolute offset via
//! `rustix`, shared across accelerators, data movers and buffers through an
//! `Arc<File>`.

// Window offsets are device offsets well under usize::MAX on every target
// this runs on.
#![allow(clippy::cast_possible_truncation)]

use rustix::io::{pread, pwrite};
use std::fs::File;
use std::sync::Arc;

use crate::error::{HalError, Result};

/// A window of a char device, addressed relative to `base`.
#[derive(Debug, Clone)]
pub struct IoWindow {
    file: Arc<File>,
    base: u64,
    len: usize,
}

impl IoWindow {
    /// Create a window of `len` bytes starting at absolute offset `base`.
    #[must_use]
    pub fn new(file: Arc<File>, base: u64, len: usize) -> Self {
        Self { file, base, len }
    }

    /// Window size in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when the window is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute device offset of this window.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// True when `count` bytes at `offset` fit inside the window.
    #[must_use]
    pub fn contains(&self, offset: u64, count: usize) -> bool {
        (offset as usize)
            .checked_add(count)
            .is_some_and(|end| end <= self.len)
    }

    fn check(&self, offset: u64, count: usize) -> Result<()> {
        if self.contains(offset, count) {
            Ok(())
        } else {
            Err(HalError::invalid_parameter(format!(
                "range {offset:#x}+{count} exceeds window of {} bytes",
                self.len
            )))
        }
    }

    /// Read bytes at a window-relative offset.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an out-of-window range or
    /// `TransferFailed` if the device read fails or comes up short.
    pub fn read_at(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check(offset, out.len())?;
        let mut done = 0;
        while done < out.len() {
            let n = pread(&*self.file, &mut out[done..], self.base + offset + done as u64)
                .map_err(|e| HalError::transfer_failed(format!("read failed: {e}")))?;
            if n == 0 {
                return Err(HalError::transfer_failed(format!(
                    "short read: {done} of {} bytes",
                    out.len()
                )));
            }
            done += n;
        }
        Ok(())
    }

    /// Write bytes at a window-relative offset.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` on an out-of-window range or
    /// `TransferFailed` if the device write fails or comes up short.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        let mut done = 0;
        while done < data.len() {
            let n = pwrite(&*self.file, &data[done..], self.base + offset + done as u64)
                .map_err(|e| HalError::transfer_failed(format!("write failed: {e}")))?;
            if n == 0 {
                return Err(HalError::transfer_failed(format!(
                    "short write: {done} of {} bytes",
                    data.len()
                )));
            }
            done += n;
        }
        Ok(())
    }

    /// Read one 32-bit register at a window-relative offset.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`IoWindow::read_at`].
    pub fn read32_at(&self, offset: u64) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_at(offset, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Write one 32-bit register at a window-relative offset.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`IoWindow::write_at`].
    pub fn write32_at(&self, offset: u64, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }
}
